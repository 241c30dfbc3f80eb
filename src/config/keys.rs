//! Configuration key catalogue.
//!
//! Keys are environment-variable shaped because every external tool receives
//! the full context as its environment.

/// Target scheme
pub const APP_SCHEME: &str = "APP_SCHEME";
/// `.xcworkspace` to build (takes precedence over `APP_PROJECT`)
pub const APP_WORKSPACE: &str = "APP_WORKSPACE";
/// `.xcodeproj` to build
pub const APP_PROJECT: &str = "APP_PROJECT";
/// Info.plist holding version and build number
pub const APP_INFO_PLIST: &str = "APP_INFO_PLIST";
/// Build configuration name
pub const APP_CONFIGURATION: &str = "APP_CONFIGURATION";
/// SDK passed to the build tool
pub const APP_SDK: &str = "APP_SDK";
/// Output directory for every artifact
pub const BUILD_DIR: &str = "BUILD_DIR";

pub const BOOTSTRAP_SCRIPT: &str = "BOOTSTRAP_SCRIPT";

pub const SIGNING_ENABLED: &str = "SIGNING_ENABLED";
pub const KEYCHAIN_PATH: &str = "KEYCHAIN_PATH";
pub const KEYCHAIN_PASSWORD: &str = "KEYCHAIN_PASSWORD";
pub const CODE_SIGN_IDENTITY: &str = "CODE_SIGN_IDENTITY";

pub const IMPORT_PROFILE: &str = "IMPORT_PROFILE";
pub const PROVISIONING_PROFILE: &str = "PROVISIONING_PROFILE";
pub const FETCH_PROFILE: &str = "FETCH_PROFILE";
pub const PROFILE_NAME: &str = "PROFILE_NAME";
pub const PROFILE_TYPE: &str = "PROFILE_TYPE";
pub const PROFILES_DIR: &str = "PROFILES_DIR";
pub const STRICT_PROFILE_UUID: &str = "STRICT_PROFILE_UUID";

pub const SYNC_DEPENDENCIES: &str = "SYNC_DEPENDENCIES";
pub const DEPENDENCY_TOOL: &str = "DEPENDENCY_TOOL";
pub const DEPENDENCY_ARGS: &str = "DEPENDENCY_ARGS";

pub const BUMP_BUILD_NUMBER: &str = "BUMP_BUILD_NUMBER";
/// Externally supplied build number, used verbatim
pub const BUILD_NUMBER: &str = "BUILD_NUMBER";

pub const RUN_TESTS: &str = "RUN_TESTS";
pub const TEST_DESTINATION: &str = "TEST_DESTINATION";

pub const EXPORT_PACKAGE: &str = "EXPORT_PACKAGE";
pub const EXPORT_OPTIONS_PLIST: &str = "EXPORT_OPTIONS_PLIST";

pub const ZIP_ARTIFACTS: &str = "ZIP_ARTIFACTS";

pub const UPLOAD_CRASH_REPORTS: &str = "UPLOAD_CRASH_REPORTS";
pub const CRASH_API_TOKEN: &str = "CRASH_API_TOKEN";
pub const CRASH_APP_ID: &str = "CRASH_APP_ID";
pub const CRASH_UPLOAD_TOOL: &str = "CRASH_UPLOAD_TOOL";

pub const XCODEBUILD: &str = "XCODEBUILD";
pub const XCODEBUILD_EXTRA_ARGS: &str = "XCODEBUILD_EXTRA_ARGS";
pub const PLIST_BUDDY: &str = "PLIST_BUDDY";
pub const SECURITY_TOOL: &str = "SECURITY_TOOL";
pub const PROFILE_FETCH_TOOL: &str = "PROFILE_FETCH_TOOL";

pub const OUTPUT_FILTER: &str = "OUTPUT_FILTER";
pub const COMMAND_TIMEOUT_SECS: &str = "COMMAND_TIMEOUT_SECS";

// Computed by later stages; the only keys writable after configure.
pub const APP_VERSION: &str = "APP_VERSION";
pub const APP_BUILD_NUMBER: &str = "APP_BUILD_NUMBER";
pub const ARTIFACT_ID: &str = "ARTIFACT_ID";
pub const ARCHIVE_PATH: &str = "ARCHIVE_PATH";
pub const IPA_PATH: &str = "IPA_PATH";
pub const DSYM_PATH: &str = "DSYM_PATH";
pub const DSYM_ZIP_PATH: &str = "DSYM_ZIP_PATH";
pub const BUNDLE_ZIP_PATH: &str = "BUNDLE_ZIP_PATH";
pub const PROFILE_UUID: &str = "PROFILE_UUID";

/// Keys that may change after the context is frozen.
pub const COMPUTED: &[&str] = &[
    APP_VERSION,
    APP_BUILD_NUMBER,
    ARTIFACT_ID,
    ARCHIVE_PATH,
    IPA_PATH,
    DSYM_PATH,
    DSYM_ZIP_PATH,
    BUNDLE_ZIP_PATH,
    PROFILE_UUID,
];

/// Boolean feature toggles. Absent means disabled.
pub const FLAGS: &[&str] = &[
    SIGNING_ENABLED,
    IMPORT_PROFILE,
    FETCH_PROFILE,
    STRICT_PROFILE_UUID,
    SYNC_DEPENDENCIES,
    BUMP_BUILD_NUMBER,
    RUN_TESTS,
    EXPORT_PACKAGE,
    ZIP_ARTIFACTS,
    UPLOAD_CRASH_REPORTS,
];

/// Process defaults, overridden by the configuration file.
pub const DEFAULTS: &[(&str, &str)] = &[
    (APP_CONFIGURATION, "Release"),
    (APP_SDK, "iphoneos"),
    (BUILD_DIR, "build"),
    (PROFILE_TYPE, "distribution"),
    (DEPENDENCY_TOOL, "pod"),
    (DEPENDENCY_ARGS, "install"),
    (TEST_DESTINATION, "platform=iOS Simulator,name=iPhone 15"),
    (CRASH_UPLOAD_TOOL, "crash-upload"),
    (XCODEBUILD, "xcodebuild"),
    (PLIST_BUDDY, "/usr/libexec/PlistBuddy"),
    (SECURITY_TOOL, "security"),
    (PROFILE_FETCH_TOOL, "ios"),
    (OUTPUT_FILTER, "condensed"),
];

/// Keys whose values are paths relative to the configuration file.
pub const PATH_KEYS: &[&str] = &[
    APP_WORKSPACE,
    APP_PROJECT,
    APP_INFO_PLIST,
    BUILD_DIR,
    BOOTSTRAP_SCRIPT,
    KEYCHAIN_PATH,
    PROVISIONING_PROFILE,
    PROFILES_DIR,
    EXPORT_OPTIONS_PLIST,
];
