use reqwest::Client;
use std::time::Duration;

pub fn build_http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(concat!("affiliate_shorts/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(15))
        .build()
}
