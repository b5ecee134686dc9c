use anyhow::{Context, Result};
use std::sync::Mutex;
use std::time::Duration;

use super::scratch::RunDirs;
use crate::settings::Settings;

pub(crate) struct ServerState {
    pub(crate) settings: Settings,
    pub(crate) http: reqwest::Client,
    /// The run the export endpoints serve from; replaced on every /fetch.
    pub(crate) latest_run: Mutex<Option<RunDirs>>,
}

impl ServerState {
    pub(crate) fn new(settings: Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .with_context(|| "failed to build http client")?;
        Ok(Self {
            settings,
            http,
            latest_run: Mutex::new(None),
        })
    }
}
