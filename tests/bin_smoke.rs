use solartty::{
    app::{App, AppConfig, LogLevel},
    cli::{Command, RunOptions},
    config::Config,
};
use std::{
    env, fs,
    path::Path,
    sync::{Mutex, OnceLock},
};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn with_temp_home<F: FnOnce(&Path)>(f: F) {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|p| p.into_inner());
    let original_home = env::var_os("HOME");
    let home = tempfile::tempdir().expect("failed to create temp HOME");
    env::set_var("HOME", home.path());
    f(home.path());
    if let Some(val) = original_home {
        env::set_var("HOME", val);
    } else {
        env::remove_var("HOME");
    }
}

fn write_config(home: &Path, contents: &str) {
    let cfg_dir = home.join(".solartty");
    fs::create_dir_all(&cfg_dir).expect("failed to create config dir");
    fs::write(cfg_dir.join("config.toml"), contents).expect("failed to write config");
}

#[test]
fn first_run_writes_default_config() {
    with_temp_home(|home| {
        let app = App::from_options(RunOptions::default()).expect("app should build");
        assert_eq!(app.config().device, "auto");
        assert_eq!(app.config().baud, 9_600);
        let written = fs::read_to_string(home.join(".solartty/config.toml"))
            .expect("config file should be created");
        assert!(written.contains("heartbeat_ms = 1000"));
        assert!(written.contains("sample_capacity = 50"));
    });
}

#[test]
fn prints_version() {
    let args = vec!["--version".to_string()];
    let cmd = Command::parse(&args).unwrap();
    assert!(matches!(cmd, Command::ShowVersion));
    assert!(!env!("CARGO_PKG_VERSION").is_empty());
}

#[test]
fn help_lists_core_flags() {
    let help = Command::help();
    for flag in [
        "--device",
        "--baud",
        "--heartbeat-ms",
        "--log-level",
        "--log-file",
        "ports",
    ] {
        assert!(
            help.contains(flag),
            "help output missing flag {flag}: {help}"
        );
    }
}

#[test]
fn config_selects_fixed_device() {
    with_temp_home(|home| {
        write_config(
            home,
            r#"
device = "/dev/ttyACM0"
baud = 9600
jog_duty = 180
        "#,
        );
        let cfg = Config::load_or_default().expect("config load failed");
        let merged = AppConfig::from_sources(cfg, RunOptions::default());
        assert_eq!(merged.device, "/dev/ttyACM0");
        assert_eq!(merged.baud, 9_600);
        assert_eq!(merged.jog_duty, 180);
    });
}

#[test]
fn cli_overrides_config_device_baud_and_heartbeat() {
    with_temp_home(|home| {
        write_config(
            home,
            r#"
device = "/dev/ttyACM0"
baud = 9600
heartbeat_ms = 2000
        "#,
        );
        let args: Vec<String> = [
            "run",
            "--device",
            "/dev/ttyUSB1",
            "--baud",
            "19200",
            "--heartbeat-ms",
            "500",
            "--log-level",
            "warn",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let Command::Run(opts) = Command::parse(&args).unwrap() else {
            panic!("expected run command");
        };
        let app = App::from_options(opts).expect("app should build");
        assert_eq!(app.config().device, "/dev/ttyUSB1");
        assert_eq!(app.config().baud, 19_200);
        assert_eq!(app.config().heartbeat_ms, 500);
        assert_eq!(app.config().log_level, LogLevel::Warn);
    });
}

#[test]
fn invalid_config_is_reported_with_line() {
    with_temp_home(|home| {
        write_config(home, "device = \"/dev/ttyACM0\"\ncols = 16\n");
        let err = App::from_options(RunOptions::default())
            .err()
            .expect("unknown key should be rejected");
        assert!(
            format!("{err}").contains("unknown config key 'cols' on line 2"),
            "unexpected error: {err}"
        );
    });
}
