use std::path::Path;
use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How generic error/failure keywords are matched against received lines.
///
/// Firmware is inconsistent about this: some families emit `ERROR:`, some
/// `Error:`, some lowercase `error`/`fail` scattered through otherwise
/// harmless lines. The keyword set and case policy therefore belong to the
/// device profile instead of being hardcoded.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeywordPolicy {
    /// Substrings which mark a line as an SDK error.
    pub keywords: Vec<String>,

    /// Whether keyword matching ignores case.
    pub case_insensitive: bool,

    /// Lines containing any of these substrings are never counted,
    /// even if a keyword matches. Used for known-noisy retries.
    pub ignore: Vec<String>,
}

impl KeywordPolicy {
    /// Does this line contain an error keyword (and no ignore marker)?
    pub fn matches(&self, line: &str) -> bool {
        let haystack = if self.case_insensitive {
            line.to_lowercase()
        } else {
            line.to_string()
        };

        let normalize = |s: &String| {
            if self.case_insensitive {
                s.to_lowercase()
            } else {
                s.clone()
            }
        };

        if self.ignore.iter().any(|i| haystack.contains(&normalize(i))) {
            return false;
        }

        self.keywords.iter().any(|k| haystack.contains(&normalize(k)))
    }
}

/// Substrings which identify firmware-level failures in device output.
///
/// These are matched before the generic keyword policy, so a line hitting
/// one of these produces exactly one event even if it also contains a
/// generic keyword.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FailureMarkers {
    /// The firmware could not initialize its cloud client.
    pub firmware_init: Option<String>,

    /// An on-board sensor failed to initialize.
    pub sensor_init: Option<String>,

    /// The device could not join its saved network.
    pub wifi: Option<String>,
}

/// What to do before the first read after sending a matching command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecialAction {
    /// Sleep this long before reading. Used for commands whose
    /// acknowledgment takes extra settle time to appear.
    SettleDelay(Duration),

    /// Sleep `wait`, then keep polling until at least `min_bytes` of
    /// output are pending. Used for commands (like `exit`) where the
    /// device goes quiet for a long time before its final burst.
    AwaitOutput {
        /// Initial sleep before polling starts.
        wait: Duration,

        /// Minimum pending bytes before the device counts as talking.
        min_bytes: usize,
    },
}

/// A timing rule keyed by command content.
///
/// The trigger is matched against the *outgoing* command text, not the
/// response, since the required wait is a property of what was asked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialRule {
    /// Substring looked for in the outgoing command.
    pub trigger: String,

    /// What to do when the trigger matches.
    pub action: SpecialAction,
}

/// Static configuration for one device family: framing, timing and
/// classification quirks. Immutable once constructed; one instance is
/// selected per test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Profile identity, e.g. "mxchip". Matched against `--device`.
    pub name: String,

    /// Appended to every outgoing command. `\r\n` for UART families.
    pub line_terminator: String,

    /// How incoming byte streams split into lines.
    pub read_delimiter: char,

    /// Outgoing writes are split into pieces of this many bytes.
    /// `0` means unbounded (a single write).
    pub chunk_size: usize,

    /// Sleep between chunked writes. The mxchip needs at least 50ms
    /// between 128 byte writes or it drops bytes on the floor.
    pub inter_chunk_delay: Duration,

    /// Sleep after a completed write before the first read, to let the
    /// bus turn around.
    pub post_write_delay: Duration,

    /// How many bits of response to let accumulate between reads.
    /// Together with the baud rate this sets the drain pacing.
    pub read_budget_bits: u64,

    /// Nominal transfer rate in bits per second.
    pub baud: u32,

    /// How long a flash/boot cycle is expected to take.
    /// The setup wait is bounded by a multiple of this.
    pub boot_wait: Duration,

    /// A line containing this marks device setup as complete.
    /// If absent, setup just drains the boot banner until quiet.
    pub setup_marker: Option<String>,

    /// Generic error keyword matching.
    pub keywords: KeywordPolicy,

    /// Firmware-level failure markers.
    pub markers: FailureMarkers,

    /// Ordered timing rules. First match wins, so order is significant
    /// and preserved from configuration.
    pub special_rules: Vec<SpecialRule>,

    /// Command sent when the operator asks for a device reset after
    /// the run.
    pub reset_command: Option<String>,
}

impl DeviceProfile {
    /// The line terminator as raw bytes.
    pub fn terminator_bytes(&self) -> &[u8] {
        self.line_terminator.as_bytes()
    }

    /// The read delimiter as a single byte.
    pub fn delimiter_byte(&self) -> u8 {
        self.read_delimiter as u8
    }

    /// The pause between reads while draining: long enough for a full
    /// response chunk to have arrived at the configured rate.
    pub fn drain_pause(&self) -> Duration {
        Duration::from_secs_f64(self.read_budget_bits as f64 / f64::from(self.baud))
    }

    /// The first timing rule whose trigger is contained in `command`.
    pub fn special_rule_for(&self, command: &str) -> Option<&SpecialRule> {
        self.special_rules
            .iter()
            .find(|rule| command.contains(&rule.trigger))
    }

    fn validate(&self) -> Result<(), Error> {
        if self.baud == 0 {
            return Err(Error::BadConfig(format!(
                "Profile `{}` has a baud rate of zero.",
                self.name
            )));
        }

        if self.line_terminator.is_empty() {
            return Err(Error::BadConfig(format!(
                "Profile `{}` has an empty line terminator. Commands would never be framed.",
                self.name
            )));
        }

        if !self.read_delimiter.is_ascii() {
            return Err(Error::BadConfig(format!(
                "Profile `{}` has a non-ASCII read delimiter `{}`.",
                self.name, self.read_delimiter
            )));
        }

        let duplicates = self
            .special_rules
            .iter()
            .map(|rule| &rule.trigger)
            .duplicates()
            .collect::<Vec<_>>();

        if !duplicates.is_empty() {
            return Err(Error::BadConfig(format!(
                "Profile `{}` has duplicate special rule triggers. Only the first of each would ever apply. Duplicates: {duplicates:?}",
                self.name
            )));
        }

        Ok(())
    }
}

/// The set of device profiles available to a run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Profiles {
    /// The profiles, looked up by name.
    pub profiles: Vec<DeviceProfile>,
}

impl Profiles {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    /// Panics if the input is not valid .ron.
    pub fn deserialize(input: &str) -> Self {
        Self::ron().from_str::<Profiles>(input).unwrap()
    }

    /// Serialize the profiles in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap()
    }

    /// Setup profiles from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Self {
        let s = std::fs::read_to_string(p).unwrap();

        Self::deserialize(&s)
    }

    /// The built-in profiles for known device families.
    pub fn builtin() -> Self {
        Self {
            profiles: vec![
                builtin::mxchip(),
                builtin::esp32(),
                builtin::esp8266(),
                builtin::rpi(),
                builtin::process(),
            ],
        }
    }

    /// Built-in profiles, with any profile from `overrides` replacing a
    /// built-in of the same name or extending the set.
    pub fn builtin_with_overrides(overrides: Profiles) -> Self {
        let mut merged = Self::builtin();

        for profile in overrides.profiles {
            if let Some(existing) = merged
                .profiles
                .iter_mut()
                .find(|existing| existing.name == profile.name)
            {
                *existing = profile;
            } else {
                merged.profiles.push(profile);
            }
        }

        merged
    }

    /// Find a profile by name.
    pub fn find(&self, name: &str) -> Option<&DeviceProfile> {
        self.profiles.iter().find(|profile| profile.name == name)
    }

    /// An example profile file with a single custom family.
    pub fn example() -> Self {
        let mut profile = builtin::mxchip();
        profile.name = "my-devkit".into();
        profile.setup_marker = Some("Setup complete".into());

        Self {
            profiles: vec![profile],
        }
    }

    fn check_duplicate_names(&self) -> Result<(), Error> {
        let duplicates = self
            .profiles
            .iter()
            .map(|profile| &profile.name)
            .duplicates()
            .collect::<Vec<_>>();

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Error::BadConfig(format!(
                "Profile names must be unique. Duplicates: {duplicates:?}"
            )))
        }
    }

    /// Validate the whole profile set.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_duplicate_names()?;

        for profile in &self.profiles {
            profile.validate()?;
        }

        Ok(())
    }
}

/// Profiles for the device families this tool grew up with.
mod builtin {
    use super::*;

    /// The mxchip devkit. 128 byte UART buffer, needs 50ms between
    /// chunked writes, and telemetry commands need settle time before
    /// their acknowledgment shows up.
    pub(super) fn mxchip() -> DeviceProfile {
        DeviceProfile {
            name: "mxchip".into(),
            line_terminator: "\r\n".into(),
            read_delimiter: '\n',
            chunk_size: 128,
            inter_chunk_delay: Duration::from_millis(50),
            post_write_delay: Duration::from_secs(1),
            read_budget_bits: 1600,
            baud: 115_200,
            boot_wait: Duration::from_secs(45),
            setup_marker: Some("Setup complete".into()),
            keywords: KeywordPolicy {
                keywords: vec!["ERROR:".into()],
                case_insensitive: false,
                ignore: vec![],
            },
            markers: FailureMarkers {
                firmware_init: Some("IoT Hub init failed".into()),
                sensor_init: Some("Sensor init failed".into()),
                wifi: Some("WiFi connect failed".into()),
            },
            special_rules: vec![
                SpecialRule {
                    trigger: "send_telemetry".into(),
                    action: SpecialAction::SettleDelay(Duration::from_millis(150)),
                },
                SpecialRule {
                    trigger: "set_az_iothub".into(),
                    action: SpecialAction::SettleDelay(Duration::from_millis(150)),
                },
                SpecialRule {
                    trigger: "exit".into(),
                    action: SpecialAction::AwaitOutput {
                        wait: Duration::from_secs(45),
                        min_bytes: 4,
                    },
                },
            ],
            reset_command: Some("reset".into()),
        }
    }

    /// The esp32 runs its UART at 1Mbaud and prints loosely-cased
    /// errors, so keyword matching is case-insensitive. NTP retries are
    /// expected noise and excluded from the count.
    pub(super) fn esp32() -> DeviceProfile {
        DeviceProfile {
            name: "esp32".into(),
            baud: 1_000_000,
            read_budget_bits: 800,
            keywords: KeywordPolicy {
                keywords: vec!["error".into(), "fail".into()],
                case_insensitive: true,
                ignore: vec!["epoch time failed!".into()],
            },
            markers: FailureMarkers {
                firmware_init: Some("IoT Hub init failed".into()),
                sensor_init: None,
                wifi: Some("WiFi connect failed".into()),
            },
            special_rules: vec![SpecialRule {
                trigger: "exit".into(),
                action: SpecialAction::AwaitOutput {
                    wait: Duration::from_secs(45),
                    min_bytes: 4,
                },
            }],
            setup_marker: None,
            reset_command: None,
            ..mxchip()
        }
    }

    /// Like the esp32 but at the usual rate.
    pub(super) fn esp8266() -> DeviceProfile {
        DeviceProfile {
            name: "esp8266".into(),
            baud: 115_200,
            read_budget_bits: 1600,
            ..esp32()
        }
    }

    /// A Raspberry Pi presenting a login shell over serial. No write
    /// chunking needed, and only test summaries are classified; shells
    /// print "error" far too casually for keyword counting.
    pub(super) fn rpi() -> DeviceProfile {
        DeviceProfile {
            name: "rpi".into(),
            line_terminator: "\n".into(),
            chunk_size: 0,
            inter_chunk_delay: Duration::ZERO,
            keywords: KeywordPolicy::default(),
            markers: FailureMarkers::default(),
            special_rules: vec![],
            setup_marker: None,
            reset_command: None,
            ..mxchip()
        }
    }

    /// A local process standing in for a device. Unchunked pipe writes;
    /// classification matches the test binaries we run this way.
    pub(super) fn process() -> DeviceProfile {
        DeviceProfile {
            name: "process".into(),
            line_terminator: "\n".into(),
            read_delimiter: '\n',
            chunk_size: 0,
            inter_chunk_delay: Duration::ZERO,
            post_write_delay: Duration::from_millis(100),
            read_budget_bits: 1600,
            baud: 115_200,
            boot_wait: Duration::from_secs(45),
            setup_marker: None,
            keywords: KeywordPolicy {
                keywords: vec!["Error:".into()],
                case_insensitive: false,
                ignore: vec![],
            },
            markers: FailureMarkers::default(),
            special_rules: vec![],
            reset_command: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn serialize() {
        let p = Profiles::example();

        println!("{}", p.serialize_pretty());
    }

    #[test]
    fn roundtrip() {
        let p = Profiles::builtin();

        let text = p.serialize_pretty();
        let back = Profiles::deserialize(&text);

        assert_eq!(p.profiles.len(), back.profiles.len());
        assert_eq!(back.find("mxchip").unwrap().chunk_size, 128);
    }

    #[test]
    fn builtins_validate() {
        Profiles::builtin().validate().unwrap();
    }

    #[test]
    fn builtin_names() {
        let p = Profiles::builtin();

        for name in ["mxchip", "esp32", "esp8266", "rpi", "process"] {
            assert!(p.find(name).is_some(), "missing builtin `{name}`");
        }

        assert!(p.find("nonsense").is_none());
    }

    #[test]
    fn overrides_replace_builtins() {
        let mut custom = builtin::mxchip();
        custom.chunk_size = 64;

        let merged = Profiles::builtin_with_overrides(Profiles {
            profiles: vec![custom],
        });

        assert_eq!(merged.find("mxchip").unwrap().chunk_size, 64);
        // The rest of the builtins survive.
        assert!(merged.find("esp32").is_some());
    }

    #[test]
    fn bad_config_duplicate_rule_triggers() {
        let mut profile = builtin::mxchip();
        profile.special_rules.push(SpecialRule {
            trigger: "exit".into(), // Duplicate!
            action: SpecialAction::SettleDelay(Duration::from_millis(1)),
        });

        let p = Profiles {
            profiles: vec![profile],
        };

        let err = p.validate().unwrap_err().try_into_bad_config().unwrap();

        assert!(err.contains("exit"));
    }

    #[test]
    fn bad_config_duplicate_names() {
        let p = Profiles {
            profiles: vec![builtin::mxchip(), builtin::mxchip()],
        };

        let err = p.validate().unwrap_err().try_into_bad_config().unwrap();

        assert!(err.contains("mxchip"));
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut profile = builtin::mxchip();
        profile.special_rules = vec![
            SpecialRule {
                trigger: "telemetry".into(),
                action: SpecialAction::SettleDelay(Duration::from_millis(150)),
            },
            SpecialRule {
                trigger: "send".into(),
                action: SpecialAction::SettleDelay(Duration::from_millis(999)),
            },
        ];

        // Both triggers are substrings of the command; the first rule
        // in configuration order applies.
        let rule = profile.special_rule_for("send_telemetry -m hi").unwrap();
        assert_eq!(
            rule.action,
            SpecialAction::SettleDelay(Duration::from_millis(150))
        );
    }

    #[test]
    fn no_rule_for_plain_command() {
        let profile = builtin::mxchip();

        assert!(profile.special_rule_for("get_status").is_none());
    }

    #[test]
    fn keyword_case_policy() {
        let strict = KeywordPolicy {
            keywords: vec!["ERROR:".into()],
            case_insensitive: false,
            ignore: vec![],
        };

        assert!(strict.matches("ERROR: it broke"));
        assert!(!strict.matches("error: it broke"));

        let loose = KeywordPolicy {
            keywords: vec!["error".into(), "fail".into()],
            case_insensitive: true,
            ignore: vec!["epoch time failed!".into()],
        };

        assert!(loose.matches("Download FAILED"));
        assert!(loose.matches("Some Error occurred"));
        // The ignore list shadows keyword hits.
        assert!(!loose.matches("Epoch Time Failed! retrying"));
    }
}
