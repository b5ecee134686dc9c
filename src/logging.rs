use anyhow::Result;
use tracing_subscriber::fmt;

pub fn init(verbose: bool) -> Result<()> {
    let builder = fmt()
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);
    let _ = if verbose {
        builder.with_max_level(tracing::Level::DEBUG).try_init()
    } else {
        builder.with_max_level(tracing::Level::INFO).try_init()
    };
    Ok(())
}
