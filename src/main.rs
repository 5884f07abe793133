use gift_relay::bootstrap::run_bootstrap;
use gift_relay::utils::error::RelayResult;

#[tokio::main]
async fn main() -> RelayResult<()> {
    run_bootstrap().await
}
