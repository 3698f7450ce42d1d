use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    annvault_cli::main_entry().await
}
