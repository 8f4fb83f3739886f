use tracing::info;

use crate::config::DeviceProfile;

/// The substring marking a device-emitted test summary line,
/// e.g. `3 tests ran, 1 failed`.
const SUMMARY_MARKER: &str = " tests ran";

/// What a received line means for the run's verdict.
///
/// Produced per line and immediately folded into an [`ErrorCounter`],
/// never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationEvent {
    /// The firmware could not initialize its cloud client.
    FirmwareInitFailure,

    /// The device could not join its saved network.
    WifiFailure,

    /// A generic SDK-level error, sensor init failures included.
    SdkError,

    /// The device reported its own authoritative pass/fail tally.
    TestSummary {
        /// First integer embedded in the summary line.
        passed: u32,

        /// Second integer, when present. This is the failure count.
        failed: Option<u32>,
    },
}

/// Pure mapping from a received text line to at most one
/// [`ClassificationEvent`], driven by the device profile's markers and
/// keyword policy. First match wins; later checks are skipped.
#[derive(Debug, Clone, Copy)]
pub struct LineClassifier<'a> {
    profile: &'a DeviceProfile,
}

impl<'a> LineClassifier<'a> {
    /// A classifier for one device family.
    pub fn new(profile: &'a DeviceProfile) -> Self {
        Self { profile }
    }

    /// Classify one decoded line.
    pub fn classify(&self, line: &str) -> Option<ClassificationEvent> {
        let markers = &self.profile.markers;

        if contains(line, &markers.firmware_init) {
            return Some(ClassificationEvent::FirmwareInitFailure);
        }

        // Sensor failures count toward the same bucket as generic SDK
        // errors, but are matched ahead of the keyword policy.
        if contains(line, &markers.sensor_init) {
            return Some(ClassificationEvent::SdkError);
        }

        if contains(line, &markers.wifi) {
            return Some(ClassificationEvent::WifiFailure);
        }

        if self.profile.keywords.matches(line) {
            return Some(ClassificationEvent::SdkError);
        }

        if line.contains(SUMMARY_MARKER) {
            if let Some(summary) = parse_summary(line) {
                return Some(summary);
            }
        }

        None
    }
}

fn contains(line: &str, marker: &Option<String>) -> bool {
    marker.as_deref().is_some_and(|m| line.contains(m))
}

/// Extract the embedded integers from a summary line.
/// A summary without any integers classifies as nothing.
fn parse_summary(line: &str) -> Option<ClassificationEvent> {
    let mut numbers = line
        .split_whitespace()
        .filter_map(|token| token.parse::<u32>().ok());

    let passed = numbers.next()?;
    let failed = numbers.next();

    Some(ClassificationEvent::TestSummary { passed, failed })
}

/// The run-scoped error tally.
///
/// Initialized to zero at run start, incremented by classification
/// events, overwritten wholesale by a test summary, and read exactly
/// once at run end to produce the exit status. One instance per device
/// under test; never shared across devices.
#[derive(Debug, Default)]
pub struct ErrorCounter {
    errors: u32,
    summary_seen: bool,
}

impl ErrorCounter {
    /// Fold one classification event into the tally.
    pub fn record(&mut self, event: ClassificationEvent) {
        match event {
            ClassificationEvent::FirmwareInitFailure => {
                info!("Failed to connect to saved IoT Hub");
                self.errors += 1;
            }
            ClassificationEvent::WifiFailure => {
                info!("Failed to connect to saved WiFi network");
                self.errors += 1;
            }
            ClassificationEvent::SdkError => {
                self.errors += 1;
            }
            ClassificationEvent::TestSummary { passed, failed } => {
                // The device computed the final verdict itself; its
                // count replaces whatever accrued.
                self.errors = failed.unwrap_or(passed);
                self.summary_seen = true;
            }
        }
    }

    /// The current error count.
    pub fn count(&self) -> u32 {
        self.errors
    }

    /// Whether a test summary has been observed. The final drain may
    /// stop early once the device has delivered its verdict.
    pub fn summary_seen(&self) -> bool {
        self.summary_seen
    }
}
