//! Integration tests for `zone-compiler`.
//!
//! These launch the bundled `zonec-generic-plugin` binary as a real plugin
//! subprocess, linked into a scratch plugin directory.

use chrono::NaiveDate;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use zone_compiler::{
    Config, LaunchOptions, ResourceRecord, ResourceRecordValue, SerialManager, Ttl, TypeRegistry,
    Zone, ZoneCompiler, ZoneError,
};

const GENERIC_PLUGIN: &str = env!("CARGO_BIN_EXE_zonec-generic-plugin");

fn link_plugin(dir: &Path, name: &str) {
    symlink(GENERIC_PLUGIN, dir.join(name)).unwrap();
}

fn options() -> LaunchOptions {
    LaunchOptions::default()
        .with_handshake_timeout(Duration::from_secs(10))
        .with_call_timeout(Duration::from_secs(10))
}

fn example_zone(config: &Config) -> Zone {
    Zone::new(Ttl::seconds(3600), config.clone())
        .with_record(
            "www",
            ResourceRecord::new("www", "A", "192.0.2.10").with_ttl(Ttl::seconds(300)),
        )
        .with_record(
            "soa",
            ResourceRecord::new(
                "@",
                "SOA",
                "ns1.example.com. hostmaster.example.com. 1 7200 3600 1209600 300",
            ),
        )
        .with_record("apex-mx", ResourceRecord::new("@", "mx", "10 mail.example.com."))
        .with_record(
            "spf",
            ResourceRecord::new("", "TXT", "")
                .with_values(vec![ResourceRecordValue::new("\"v=spf1 -all\"", "")]),
        )
}

// ---------------------------------------------------------------------------
// Full pipeline through plugin subprocesses
// ---------------------------------------------------------------------------

#[test]
fn compiles_zone_through_subprocess() {
    let plugins = tempfile::tempdir().unwrap();
    let serials = tempfile::tempdir().unwrap();
    link_plugin(plugins.path(), "generic");

    let config = Config::new(plugins.path())
        .with_generate_serial(true)
        .with_serial_index_dir(serials.path());
    let registry = TypeRegistry::load(&config, &options()).unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.resolve("MX").unwrap().name(), "generic");

    let compiler = ZoneCompiler::from_config(&registry, &config)
        .with_serial_date(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
    let text = compiler.compile("example.com", &example_zone(&config)).unwrap();

    assert_eq!(
        text,
        "$TTL 3600\n\
         @\tIN\tMX\t10 mail.example.com.\n\
         @\tIN\tSOA\tns1.example.com. hostmaster.example.com. 2025060101 7200 3600 1209600 300\n\
         @\tIN\tTXT\t\"v=spf1 -all\"\n\
         www\t300\tIN\tA\t192.0.2.10\n"
    );

    let again = compiler.compile("example.com", &example_zone(&config)).unwrap();
    assert!(again.contains(" 2025060102 "));

    drop(compiler);
    registry.shutdown();
}

#[test]
fn repeated_compilation_is_byte_identical() {
    let plugins = tempfile::tempdir().unwrap();
    link_plugin(plugins.path(), "generic");
    let config = Config::new(plugins.path());

    let first = {
        let registry = TypeRegistry::load(&config, &options()).unwrap();
        ZoneCompiler::new(&registry)
            .compile("example.com", &example_zone(&config))
            .unwrap()
    };
    let second = {
        let registry = TypeRegistry::load(&config, &options()).unwrap();
        ZoneCompiler::new(&registry)
            .compile("example.com", &example_zone(&config))
            .unwrap()
    };
    assert_eq!(first, second);
}

#[test]
fn plugin_rejections_carry_context() {
    let plugins = tempfile::tempdir().unwrap();
    link_plugin(plugins.path(), "generic");
    let config = Config::new(plugins.path());
    let registry = TypeRegistry::load(&config, &options()).unwrap();
    let compiler = ZoneCompiler::new(&registry);

    // Record-scoped: a bad address.
    let bad = Zone::new(Ttl::inherit(), config.clone())
        .with_record("www", ResourceRecord::new("www", "A", "not-an-address"));
    let err = compiler.compile("example.com", &bad).unwrap_err();
    assert_eq!(err.identifier(), Some("www"));
    assert!(matches!(err.root(), ZoneError::Validation { plugin, .. } if plugin == "generic"));

    // Zone-scoped: two SOA records.
    let soa = "ns1 hostmaster 1 2 3 4 5";
    let doubled = Zone::new(Ttl::inherit(), config.clone())
        .with_record("soa1", ResourceRecord::new("@", "SOA", soa))
        .with_record("soa2", ResourceRecord::new("@", "SOA", soa));
    let err = compiler.compile("example.com", &doubled).unwrap_err();
    assert!(err.identifier().is_none());
    assert!(matches!(err, ZoneError::Validation { ref message, .. } if message.contains("SOA")));

    // Unclaimed type.
    let loc = Zone::new(Ttl::inherit(), config)
        .with_record("office", ResourceRecord::new("office", "LOC", "52 22 N 4 53 E 0m"));
    let err = compiler.compile("example.com", &loc).unwrap_err();
    assert_eq!(err.identifier(), Some("office"));
    assert!(matches!(err.root(), ZoneError::UnsupportedType { .. }));
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[test]
fn overlapping_plugins_fail_startup() {
    let plugins = tempfile::tempdir().unwrap();
    link_plugin(plugins.path(), "records-a");
    link_plugin(plugins.path(), "records-b");

    let err = TypeRegistry::load(&Config::new(plugins.path()), &options()).unwrap_err();
    let message = err.to_string();
    assert!(matches!(err, ZoneError::Configuration(_)));
    assert!(message.contains("records-a"));
    assert!(message.contains("records-b"));
}

#[test]
fn broken_plugin_is_skipped() {
    let plugins = tempfile::tempdir().unwrap();
    link_plugin(plugins.path(), "generic");

    let impostor = plugins.path().join("impostor");
    std::fs::write(&impostor, "#!/bin/sh\necho 'hello there'\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&impostor, std::fs::Permissions::from_mode(0o755)).unwrap();

    let registry = TypeRegistry::load(&Config::new(plugins.path()), &options()).unwrap();
    let names: Vec<_> = registry.plugins().map(|p| p.name().to_string()).collect();
    assert_eq!(names, vec!["generic"]);
}

#[test]
fn missing_plugin_directory_is_configuration_error() {
    let err = TypeRegistry::load(&Config::new("/nonexistent/zonec/plugins"), &options()).unwrap_err();
    assert!(matches!(err, ZoneError::Configuration(_)));
}

// ---------------------------------------------------------------------------
// Serials
// ---------------------------------------------------------------------------

#[test]
fn serial_sequence_across_days() {
    let dir = tempfile::tempdir().unwrap();
    let serials = SerialManager::new(dir.path());
    let june = |d| NaiveDate::from_ymd_opt(2025, 6, d).unwrap();

    assert_eq!(serials.next_serial_on("example.com", june(1)).unwrap(), "2025060101");
    assert_eq!(serials.next_serial_on("example.com", june(1)).unwrap(), "2025060102");
    assert_eq!(serials.next_serial_on("example.com", june(2)).unwrap(), "2025060201");

    let state = std::fs::read_to_string(dir.path().join("example.com.serial")).unwrap();
    assert!(state.contains("base_serial_number: 20250602"));
    assert!(state.contains("change_index: 1"));
}

/// Set in child copies of this test binary to make `serial_worker` issue one
/// serial from the named directory.
const SERIAL_WORKER_DIR: &str = "ZONEC_SERIAL_WORKER_DIR";

#[test]
fn serial_worker() {
    let Ok(dir) = std::env::var(SERIAL_WORKER_DIR) else {
        return;
    };
    let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let serial = SerialManager::new(dir)
        .with_poll_interval(Duration::from_millis(1))
        .next_serial_on("example.com", date)
        .unwrap();
    println!("issued-serial={serial}");
}

#[test]
fn concurrent_processes_get_consecutive_serials() {
    const WORKERS: u32 = 6;
    let dir = tempfile::tempdir().unwrap();
    let this_binary = std::env::current_exe().unwrap();

    let children: Vec<_> = (0..WORKERS)
        .map(|_| {
            Command::new(&this_binary)
                .args(["serial_worker", "--exact", "--nocapture", "--test-threads=1"])
                .env(SERIAL_WORKER_DIR, dir.path())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .unwrap()
        })
        .collect();

    let mut issued: Vec<u32> = children
        .into_iter()
        .map(|child| {
            let output = child.wait_with_output().unwrap();
            assert!(output.status.success());
            let stdout = String::from_utf8(output.stdout).unwrap();
            let (_, rest) = stdout.split_once("issued-serial=").unwrap();
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap()
        })
        .collect();
    issued.sort_unstable();

    let expected: Vec<u32> = (1..=WORKERS).map(|i| 2_025_060_100 + i).collect();
    assert_eq!(issued, expected);
}

#[test]
fn get_next_uses_today() {
    let dir = tempfile::tempdir().unwrap();
    let serials = SerialManager::new(dir.path());

    let serial = serials.get_next("example.com").unwrap();
    assert_eq!(serial.len(), 10);
    assert!(serial.ends_with("01"));
    assert!(serial.parse::<u32>().is_ok());
}
