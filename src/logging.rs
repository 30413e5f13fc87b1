use std::io;
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONSOLE_FILTER: &str = "info,llm_request=info,web_request=warn,db_query=warn,sqlx=off";
const DEFAULT_FILE_FILTER: &str = "info,llm_request=debug,vector_index=debug,sqlx=info";

pub fn configure_logging() {
    // RUST_LOG replaces the console defaults; the file log keeps full detail
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_CONSOLE_FILTER));

    let console_log = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(console_filter);

    let file_appender = rolling::daily("logs", "medlit.log");
    let file_log = fmt::layer()
        .with_ansi(false)
        .with_writer(file_appender)
        .with_filter(EnvFilter::new(DEFAULT_FILE_FILTER));

    tracing_subscriber::Registry::default()
        .with(console_log)
        .with(file_log)
        .init();
}
