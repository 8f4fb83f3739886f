#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serial_bench::{
    channel::{Channel, MockChannel, Pacing},
    config::{DeviceProfile, Profiles},
    pump::CommandPump,
    transcript::Transcript,
};

/// An in-memory transcript sink which stays readable after the pump
/// has taken ownership of the transcript.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(ToString::to_string).collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The mxchip profile with timings shrunk from seconds to moments, so
/// a test run takes milliseconds instead of minutes.
pub fn fast_profile() -> DeviceProfile {
    let mut profile = Profiles::builtin().find("mxchip").unwrap().clone();

    profile.inter_chunk_delay = Duration::ZERO;
    profile.post_write_delay = Duration::from_millis(1);
    profile.read_budget_bits = 8;
    profile.boot_wait = Duration::from_millis(5);
    profile.special_rules.clear();

    profile
}

/// A pump over a mock channel, with an inspectable transcript and
/// test-friendly retry timing.
pub fn pump_over(profile: DeviceProfile, mock: MockChannel) -> (CommandPump, SharedBuf) {
    let buf = SharedBuf::default();
    let transcript = Transcript::from_writer(buf.clone());
    let channel = Channel::mock(mock, Pacing::from_profile(&profile));

    let mut pump = CommandPump::new(profile, channel, transcript);
    pump.set_comm_timeout(Duration::from_millis(100));
    pump.set_reconnect_backoff(Duration::from_millis(1));

    (pump, buf)
}
