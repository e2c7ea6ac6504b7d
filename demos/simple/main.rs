use std::time::Duration;

use flagsync::{Config, EvaluationEvent, User};

pub fn main() -> flagsync::Result<()> {
    // Configure env_logger to see SDK logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("flagsync")).init();

    let mobile_key = std::env::var("FLAGSYNC_MOBILE_KEY")
        .expect("FLAGSYNC_MOBILE_KEY env variable should contain mobile key");
    let client = Config::from_mobile_key(mobile_key)
        .event_processor(|event: EvaluationEvent| {
            println!("Sending evaluation event: {:?}", event);
        })
        .to_client(User::with_key("test-user").with_attribute("email", "test@example.com"));

    let _subscription = client.on_flag_change(|change| {
        println!("Flag changed: {:?}", change);
    });

    // Until flags are received, the client returns cached values or defaults.
    match client.start().wait_timeout(Duration::from_secs(10)) {
        Some(true) => {}
        Some(false) => println!("client failed to initialize"),
        None => println!("timed out waiting for flags"),
    }

    let value = client.bool_variation("a-boolean-flag", false);
    println!("Value: {:?}", value);

    let detail = client.string_variation_detail("a-string-flag", "default");
    println!("Detail: {:?}", detail);

    client.close();

    Ok(())
}
