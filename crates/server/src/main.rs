#[tokio::main]
async fn main() -> anyhow::Result<()> {
    covidkm_server::start().await
}
