//! Integration tests for configuration stored in the data directory.

use studia_core::storage::{data_dir, Config};

#[test]
fn test_config_in_overridden_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("STUDIA_DATA_DIR", dir.path());

    assert_eq!(data_dir().unwrap(), dir.path());
    let mut cfg = Config::load().unwrap();
    assert_eq!(cfg, Config::default());
    assert!(dir.path().join("config.toml").exists());

    cfg.set("student.default_level", "4").unwrap();
    cfg.set("run.seed", "99").unwrap();
    cfg.save().unwrap();

    let reloaded = Config::load().unwrap();
    assert_eq!(reloaded.student.default_level, 4);
    assert_eq!(reloaded.run.seed, Some(99));
    assert_eq!(reloaded.queue_path(&data_dir().unwrap()), dir.path().join("retry_queue.json"));

    std::env::remove_var("STUDIA_DATA_DIR");
}
