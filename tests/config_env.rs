// Runs in its own test binary: the environment is process-wide.

use framebridge::{Config, ENV_PREFIX};

#[test]
fn environment_overrides_defaults() {
    std::env::set_var(format!("{ENV_PREFIX}_BRIDGE__BUDGET_BYTES"), "4096");
    std::env::set_var(format!("{ENV_PREFIX}_CAPTURE__FPS"), "15");
    std::env::set_var(format!("{ENV_PREFIX}_BRIDGE__NONBLOCKING"), "true");

    let config = Config::load(None).unwrap();
    assert_eq!(config.bridge.budget_bytes, 4096);
    assert_eq!(config.capture.fps, 15);
    assert!(config.bridge.nonblocking);
    assert_eq!(config.capture.width, 640);

    std::env::set_var(format!("{ENV_PREFIX}_BRIDGE__BUDGET_BYTES"), "0");
    assert!(Config::load(None).is_err());
}
