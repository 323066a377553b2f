#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dockyard::bootstrapper::run().await
}
