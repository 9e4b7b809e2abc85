/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
use std::fs;

use postline::config::CONFIG;
use postline::prelude::*;

use crate::setup::initialize_tracing;

mod setup;

// Everything touching XDG_CONFIG_HOME lives in one test: the environment is
// process-wide and CONFIG is initialized only once.
#[test]
fn test_configuration_is_read_from_xdg_config_home() -> anyhow::Result<()> {
    initialize_tracing();
    let home = tempfile::tempdir()?;
    let config_dir = home.path().join("postline");
    fs::create_dir_all(&config_dir)?;
    let config_file = config_dir.join("config.toml");
    fs::write(
        &config_file,
        r#"
[dispatcher]
response_timeout_ms = 250
acknowledge = true

[tcpip]
host = "10.0.0.7"
base_port = 7000
"#,
    )?;
    std::env::set_var("XDG_CONFIG_HOME", home.path());

    assert_eq!(CONFIG.dispatcher.response_timeout_ms, 250);
    let dispatcher = Dispatcher::new(LoopbackBackend::new(), RoutingTable::builder().build());
    assert!(dispatcher.config().acknowledge);
    assert_eq!(dispatcher.config().acknowledge_timeout_ms, 100);

    let loaded = PostlineConfig::load();
    assert_eq!(loaded.tcpip.server_address(), "10.0.0.7:7000");
    assert_eq!(loaded.tcpip.receiver_port(3), Some(7004));
    assert_eq!(loaded.tcpip.reconnect_interval_ms, 500);

    fs::write(&config_file, "[dispatcher]\nresponse_timeout_ms = \"soon\"\n")?;
    let fallback = PostlineConfig::load();
    assert_eq!(fallback.dispatcher, DispatcherConfig::default());

    fs::remove_file(&config_file)?;
    let missing = PostlineConfig::load();
    assert_eq!(missing.tcpip.base_port, 6666);
    Ok(())
}

#[test]
fn test_explicit_path_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = PostlineConfig::load_from(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}
