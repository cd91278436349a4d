//! Shared helpers: start an in-process engine on an ephemeral port.

#![allow(dead_code)]

use imposter_engine::{load_plugin_configs, DispatchMode, EngineSettings, ImposterServer};
use std::net::SocketAddr;
use std::path::Path;
use tempfile::TempDir;

pub struct TestEngine {
    pub base_url: String,
    pub config_dir: TempDir,
}

impl TestEngine {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Write `yaml` as a plugin configuration and serve it.
pub async fn start(yaml: &str) -> TestEngine {
    start_with(yaml, &[], DispatchMode::Inline).await
}

/// Like [`start`], with extra files placed next to the configuration.
pub async fn start_with(yaml: &str, files: &[(&str, &str)], mode: DispatchMode) -> TestEngine {
    let config_dir = TempDir::new().unwrap();
    std::fs::write(config_dir.path().join("imposter-config.yaml"), yaml).unwrap();
    for (name, contents) in files {
        let path = config_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    let base_url = serve(config_dir.path(), mode).await;
    TestEngine {
        base_url,
        config_dir,
    }
}

async fn serve(dir: &Path, mode: DispatchMode) -> String {
    let configs = load_plugin_configs(dir).unwrap();
    let settings = EngineSettings {
        listen: SocketAddr::from(([127, 0, 0, 1], 0)),
        dispatch_mode: mode,
        ..EngineSettings::default()
    };
    let server = ImposterServer::build(&configs, &settings).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    format!("http://{}", addr)
}
