#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vendor_registry::server::run().await
}
