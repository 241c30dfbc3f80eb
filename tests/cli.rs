//! Binary-level behaviour that needs no external tools.

use assert_cmd::Command;
use predicates::prelude::*;

fn bin() -> Command {
    Command::cargo_bin("kodegen_bundler_mobile").unwrap()
}

#[test]
fn missing_config_argument_is_a_configuration_error() {
    bin()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no configuration file given"));
}

#[test]
fn nonexistent_config_file_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    bin()
        .arg(dir.path().join("absent.env"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn list_stages_prints_table_in_order() {
    bin()
        .arg("--list-stages")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"(?s)bootstrap.*configure.*clean-artifacts.*build-archive.*keychain-teardown").unwrap());
}

#[test]
fn dry_run_shows_gating_without_running_tools() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("release.env");
    std::fs::write(
        &config,
        "# release settings\n\
         APP_SCHEME=MyApp\n\
         export APP_PROJECT=MyApp.xcodeproj\n\
         APP_INFO_PLIST=\"MyApp/Info.plist\"\n\
         RUN_TESTS=yes\n",
    )
    .unwrap();

    bin()
        .arg(&config)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"run\S*\s+run-tests").unwrap())
        .stdout(predicate::str::contains("skip"));
    assert!(!dir.path().join("build").exists());
}

#[test]
fn dry_run_rejects_malformed_flags() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("release.env");
    std::fs::write(
        &config,
        "APP_SCHEME=MyApp\nAPP_PROJECT=MyApp.xcodeproj\nAPP_INFO_PLIST=Info.plist\nRUN_TESTS=maybe\n",
    )
    .unwrap();

    bin()
        .arg(&config)
        .arg("--dry-run")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("RUN_TESTS"));
}

#[cfg(unix)]
mod signals {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};

    fn stub(path: &Path, body: &str) {
        std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn wait_for(path: &Path, limit: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if path.exists() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        false
    }

    #[test]
    fn sigterm_during_build_restores_keychain_and_exits_130() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let calls = root.join("security.log");
        let started = root.join("build-started");
        let keychain = root.join("ci.keychain");
        std::fs::write(&keychain, b"keychain").unwrap();

        let security = root.join("security");
        stub(
            &security,
            &format!(
                "echo \"$*\" >> '{log}'\n\
                 if [ \"$*\" = default-keychain ]; then echo '    \"{root}/login.keychain-db\"'; fi\n\
                 if [ \"$*\" = 'list-keychains -d user' ]; then echo '    \"{root}/login.keychain-db\"'; fi\n\
                 exit 0",
                log = calls.display(),
                root = root.display()
            ),
        );
        let xcodebuild = root.join("xcodebuild");
        stub(&xcodebuild, &format!("touch '{}'\nexec sleep 30", started.display()));
        let plist_buddy = root.join("PlistBuddy");
        stub(
            &plist_buddy,
            "case \"$2\" in *CFBundleVersion*) echo 7 ;; *) echo 1.0 ;; esac",
        );

        let config = root.join("release.env");
        std::fs::write(
            &config,
            format!(
                "APP_SCHEME=MyApp\n\
                 APP_PROJECT={root}/MyApp.xcodeproj\n\
                 APP_INFO_PLIST={root}/Info.plist\n\
                 BUILD_DIR={root}/build\n\
                 SIGNING_ENABLED=1\n\
                 KEYCHAIN_PATH={keychain}\n\
                 KEYCHAIN_PASSWORD=hunter2\n\
                 CODE_SIGN_IDENTITY=Apple Distribution: Example\n\
                 SECURITY_TOOL={security}\n\
                 XCODEBUILD={xcodebuild}\n\
                 PLIST_BUDDY={plist_buddy}\n",
                root = root.display(),
                keychain = keychain.display(),
                security = security.display(),
                xcodebuild = xcodebuild.display(),
                plist_buddy = plist_buddy.display(),
            ),
        )
        .unwrap();

        let mut child = Command::new(env!("CARGO_BIN_EXE_kodegen_bundler_mobile"))
            .arg(&config)
            .arg("--quiet")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        if !wait_for(&started, Duration::from_secs(20)) {
            let _ = child.kill();
            panic!("build tool never started");
        }

        let sent = Command::new("kill")
            .args(["-TERM", &child.id().to_string()])
            .status()
            .unwrap();
        assert!(sent.success());

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().unwrap() {
                break status;
            }
            if start.elapsed() > Duration::from_secs(20) {
                let _ = child.kill();
                panic!("pipeline did not stop after SIGTERM");
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        assert_eq!(status.code(), Some(130));
        let log = std::fs::read_to_string(&calls).unwrap();
        assert!(log.contains("unlock-keychain"), "{log}");
        assert_eq!(log.matches("lock-keychain").count() - log.matches("unlock-keychain").count(), 1, "{log}");
    }
}
