// Commands arrive as JSON lines on stdin; replies go to stdout, logs to stderr.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dailydoco_capture_lib::run().await
}
