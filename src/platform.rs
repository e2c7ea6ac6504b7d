//! Platform capabilities that differ between operating systems.

/// Information about the device the SDK runs on.
///
/// Implementations are supplied through [`Config::platform`](crate::Config::platform); the
/// default one is [`DefaultPlatform`].
pub trait PlatformInfo: Send + Sync {
    /// Name of the operating system.
    fn os_name(&self) -> String;

    /// Human-readable device name, if the platform exposes one.
    fn device_name(&self) -> Option<String>;
}

/// Reports the operating system the crate was compiled for and the host name from the
/// environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPlatform;

impl PlatformInfo for DefaultPlatform {
    fn os_name(&self) -> String {
        std::env::consts::OS.to_owned()
    }

    fn device_name(&self) -> Option<String> {
        std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .ok()
            .filter(|name| !name.is_empty())
    }
}
