use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::{
    channel::{
        codec::{LineBuffer, LinesCodec},
        Channel,
    },
    classify::{ErrorCounter, LineClassifier},
    config::{DeviceProfile, SpecialAction},
    error::Error,
    script::{Script, ScriptLine},
    transcript::Transcript,
};

/// How long to sleep between polls while a command's timing rule is
/// waiting for the device to start talking.
const AWAIT_OUTPUT_POLL: Duration = Duration::from_secs(1);

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The whole script was sent and the final drain completed.
    Completed,

    /// A fatal channel failure stopped the run early. The transcript
    /// and error count up to that point are still valid.
    Aborted,
}

/// What one script execution produced.
#[derive(Debug)]
pub struct RunReport {
    /// Final value of the run's error counter.
    pub errors: u32,

    /// Whether the run completed or was cut short.
    pub outcome: Outcome,

    /// Script lines actually written to the device.
    pub lines_sent: u64,

    /// Complete lines received back.
    pub lines_received: u64,
}

impl RunReport {
    /// The process exit code for this run.
    ///
    /// The error count is used directly, clamped to 255 since Unix
    /// exit codes are 8-bit and wrapping a large count to zero would
    /// fake a pass. An aborted run never reports zero.
    pub fn exit_code(&self) -> i32 {
        let errors = match self.outcome {
            Outcome::Completed => self.errors,
            Outcome::Aborted => self.errors.max(1),
        };

        errors.min(255) as i32
    }

    /// Did the run pass?
    pub fn passed(&self) -> bool {
        self.exit_code() == 0
    }
}

/// The pump's position in the command/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpState {
    /// Take the next script line and put it on the wire.
    Sending,

    /// Poll the device's reply until it goes quiet.
    Draining,

    /// Script exhausted; capture trailing asynchronous output.
    Finished,

    /// Fatal channel failure; stop, but finalize what we have.
    Aborted,
}

/// Executes a script against a device, one command at a time.
///
/// Half-duplex by construction: there is at most one outstanding write
/// and one outstanding drain, and all reads are explicit paced polls
/// with no background reader. Every received line is transcribed and
/// classified; the resulting error count is the run's verdict.
#[derive(Debug)]
pub struct CommandPump {
    profile: DeviceProfile,
    channel: Channel,
    transcript: Transcript,
    comm_timeout: Duration,
    test_timeout: Option<Duration>,
    reconnect_backoff: Duration,
}

impl CommandPump {
    /// A pump over an already-open channel.
    pub fn new(profile: DeviceProfile, channel: Channel, transcript: Transcript) -> Self {
        Self {
            profile,
            channel,
            transcript,
            comm_timeout: Duration::from_secs(60),
            test_timeout: None,
            reconnect_backoff: Duration::from_secs(2),
        }
    }

    /// Set the communication timeout bounding a single chunked write.
    pub fn set_comm_timeout(&mut self, timeout: Duration) {
        self.comm_timeout = timeout;
    }

    /// Bound the whole run by a wall-clock deadline. The deadline is
    /// checked at poll boundaries only.
    pub fn set_test_timeout(&mut self, timeout: Duration) {
        self.test_timeout = Some(timeout);
    }

    /// Set the sleep before a reconnect attempt.
    pub fn set_reconnect_backoff(&mut self, backoff: Duration) {
        self.reconnect_backoff = backoff;
    }

    /// Wait for the device to finish setting up before the run starts.
    ///
    /// With a profile setup marker: watch for it, bounded by twice the
    /// profile's boot wait; not seeing it is a setup failure and the
    /// pump must not be run. Without one: just let the boot banner
    /// drain until the device is quiet. Banner lines are logged but do
    /// not reach the transcript or the counter.
    pub async fn await_setup(&mut self) -> Result<(), Error> {
        let mut lines = LineBuffer::new(self.profile.delimiter_byte());

        match self.profile.setup_marker.clone() {
            Some(marker) => {
                info!(%marker, "Waiting for device setup to complete");

                let bound = 2 * self.profile.boot_wait;
                let deadline = Instant::now() + bound;

                loop {
                    let bytes = self.channel.read().await?;
                    lines.extend(&bytes);

                    while let Some(line) = lines.next_line() {
                        debug!("setup: {line}");

                        if line.contains(&marker) {
                            info!("Device setup complete");
                            return Ok(());
                        }
                    }

                    if Instant::now() >= deadline {
                        return Err(Error::SetupFailed(format!(
                            "no `{marker}` seen within {bound:?}"
                        )));
                    }

                    sleep(self.profile.drain_pause()).await;
                }
            }
            None => {
                sleep(self.profile.post_write_delay).await;

                loop {
                    let bytes = self.channel.read().await?;

                    if bytes.is_empty() {
                        return Ok(());
                    }

                    lines.extend(&bytes);
                    while let Some(line) = lines.next_line() {
                        debug!("boot banner: {line}");
                    }

                    sleep(self.profile.drain_pause()).await;
                }
            }
        }
    }

    /// Execute the whole script and report the verdict.
    pub async fn run(&mut self, script: Script) -> RunReport {
        let classifier = LineClassifier::new(&self.profile);
        let codec = LinesCodec::new(
            self.profile.delimiter_byte(),
            self.profile.terminator_bytes(),
        );

        let mut lines = LineBuffer::new(self.profile.delimiter_byte());
        let mut counter = ErrorCounter::default();
        let mut sent: u64 = 0;
        let mut received: u64 = 0;

        let mut script_lines = script.into_lines().into_iter();
        let mut current: Option<ScriptLine> = None;
        let mut state = PumpState::Sending;

        let started = Instant::now();

        let outcome = loop {
            match state {
                PumpState::Sending => {
                    let Some(line) = script_lines.next() else {
                        state = PumpState::Finished;
                        continue;
                    };

                    // Only the instruction, not secret arguments.
                    if let Some(token) = line.first_token() {
                        println!("Sending {token}");
                    }

                    let payload = codec.frame(line.text().as_bytes());
                    let written = write_with_retry(
                        &mut self.channel,
                        &payload,
                        self.comm_timeout,
                        self.reconnect_backoff,
                    )
                    .await;

                    if written == 0 {
                        error!("Failed to write to the device, please diagnose the connection");
                        state = PumpState::Aborted;
                        continue;
                    }

                    if written < payload.len() {
                        warn!(
                            written,
                            total = payload.len(),
                            "Partial write; the device may have missed part of the command"
                        );
                    }

                    sent += 1;
                    current = Some(line);
                    state = PumpState::Draining;
                }

                PumpState::Draining => {
                    // Bus turnaround: give the device a moment before
                    // the first read.
                    sleep(self.profile.post_write_delay).await;

                    let rule = current
                        .as_ref()
                        .and_then(|line| self.profile.special_rule_for(line.text()));

                    if let Some(rule) = rule {
                        debug!(trigger = %rule.trigger, "Applying timing rule");
                        apply_special_action(&mut self.channel, &rule.action, self.comm_timeout)
                            .await;
                    }

                    loop {
                        let bytes = match self.channel.read().await {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                warn!(?e, "Read failed while draining");
                                break;
                            }
                        };

                        if bytes.is_empty() {
                            break;
                        }

                        absorb(
                            &bytes,
                            &mut lines,
                            &classifier,
                            &mut self.transcript,
                            &mut counter,
                            &mut received,
                        );

                        sleep(self.profile.drain_pause()).await;
                    }

                    state = PumpState::Sending;
                }

                PumpState::Finished => {
                    let mut drain_failed = false;

                    if let Some(limit) = self.test_timeout {
                        // Bounded mode: the device gets until the
                        // deadline to deliver its verdict.
                        let deadline = started + limit;

                        while Instant::now() < deadline && !counter.summary_seen() {
                            sleep(self.profile.drain_pause()).await;

                            match self.channel.read().await {
                                Ok(bytes) if !bytes.is_empty() => absorb(
                                    &bytes,
                                    &mut lines,
                                    &classifier,
                                    &mut self.transcript,
                                    &mut counter,
                                    &mut received,
                                ),
                                Ok(_) => {}
                                Err(e) => {
                                    warn!(?e, "Read failed during final drain");
                                    drain_failed = true;
                                    break;
                                }
                            }
                        }
                    } else {
                        // Unbounded mode: quiet for one full poll means
                        // the device is done talking.
                        loop {
                            sleep(self.profile.drain_pause()).await;

                            match self.channel.read().await {
                                Ok(bytes) if !bytes.is_empty() => absorb(
                                    &bytes,
                                    &mut lines,
                                    &classifier,
                                    &mut self.transcript,
                                    &mut counter,
                                    &mut received,
                                ),
                                Ok(_) => {
                                    if !self.channel.has_pending_input().await {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!(?e, "Read failed during final drain");
                                    drain_failed = true;
                                    break;
                                }
                            }
                        }
                    }

                    break if drain_failed {
                        Outcome::Aborted
                    } else {
                        Outcome::Completed
                    };
                }

                PumpState::Aborted => {
                    break Outcome::Aborted;
                }
            }
        };

        // A final partial line without its delimiter still counts.
        if let Some(partial) = lines.take_partial() {
            if !partial.trim().is_empty() {
                deliver(
                    &partial,
                    &classifier,
                    &mut self.transcript,
                    &mut counter,
                );
                received += 1;
            }
        }

        RunReport {
            errors: counter.count(),
            outcome,
            lines_sent: sent,
            lines_received: received,
        }
    }

    /// Send the profile's reset command, if it has one, and discard the
    /// reboot banner. The banner must not pollute any counter, so this
    /// runs only after [`CommandPump::run`] has produced its report.
    pub async fn reset_device(&mut self) -> Result<(), Error> {
        let Some(command) = self.profile.reset_command.clone() else {
            warn!(
                profile = %self.profile.name,
                "Device family has no reset command, skipping reset"
            );
            return Ok(());
        };

        info!(%command, "Resetting device");

        let codec = LinesCodec::new(
            self.profile.delimiter_byte(),
            self.profile.terminator_bytes(),
        );
        let payload = codec.frame(command.as_bytes());

        let written = self.channel.write(&payload, self.comm_timeout).await?;
        if written < payload.len() {
            warn!(written, "Reset command only partially written");
        }

        sleep(self.profile.post_write_delay).await;

        while !self.channel.read().await?.is_empty() {
            sleep(self.profile.drain_pause()).await;
        }

        Ok(())
    }
}

/// Write with a single forgiven disconnect.
///
/// The retry budget is an explicit loop, not recursion: one backoff,
/// one reconnect, one retry. Anything more reports zero bytes, which
/// callers must treat as "unable to communicate".
async fn write_with_retry(
    channel: &mut Channel,
    payload: &[u8],
    comm_timeout: Duration,
    backoff: Duration,
) -> usize {
    for attempt in 0..2 {
        if channel.is_writable() {
            match channel.write(payload, comm_timeout).await {
                Ok(n) if n > 0 => return n,
                Ok(_) => {}
                Err(e) => warn!(?e, "Write attempt failed"),
            }
        }

        if attempt == 0 {
            debug!("Channel not writable, backing off before reconnect");
            sleep(backoff).await;

            if let Err(e) = channel.reconnect() {
                warn!(?e, "Reconnect failed");
                return 0;
            }
        }
    }

    0
}

/// Honor a profile timing rule before the first read after a send.
async fn apply_special_action(channel: &mut Channel, action: &SpecialAction, bound: Duration) {
    match action {
        SpecialAction::SettleDelay(delay) => sleep(*delay).await,
        SpecialAction::AwaitOutput { wait, min_bytes } => {
            sleep(*wait).await;

            let patience = Instant::now();

            loop {
                let pending = channel.pending_bytes().await;

                if pending >= *min_bytes {
                    break;
                }

                if patience.elapsed() > bound {
                    warn!(pending, "Gave up waiting for device output");
                    break;
                }

                debug!("{pending} bytes in waiting");
                sleep(AWAIT_OUTPUT_POLL).await;
            }
        }
    }
}

/// Split freshly read bytes into lines and deliver each.
fn absorb(
    bytes: &[u8],
    lines: &mut LineBuffer,
    classifier: &LineClassifier<'_>,
    transcript: &mut Transcript,
    counter: &mut ErrorCounter,
    received: &mut u64,
) {
    lines.extend(bytes);

    while let Some(line) = lines.next_line() {
        deliver(&line, classifier, transcript, counter);
        *received += 1;
    }
}

/// One received line: show it, transcribe it, classify it.
fn deliver(
    line: &str,
    classifier: &LineClassifier<'_>,
    transcript: &mut Transcript,
    counter: &mut ErrorCounter,
) {
    info!("{line}");

    if let Err(e) = transcript.append_line(line) {
        warn!(?e, "Could not append to transcript");
    }

    if let Some(event) = classifier.classify(line) {
        counter.record(event);
    }
}
