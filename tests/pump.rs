use std::time::Duration;

use pretty_assertions::assert_eq;
use serial_bench::{
    channel::MockBuilder,
    config::{SpecialAction, SpecialRule},
    pump::Outcome,
    script::Script,
};

mod common;

use common::{fast_profile, pump_over};

#[tokio::test]
async fn echoed_commands_reach_transcript_in_order() {
    let mock = MockBuilder::new().echo().build();
    let (mut pump, transcript) = pump_over(fast_profile(), mock);

    let report = pump
        .run(Script::from_text("ping\nstatus\nexit\n"))
        .await;

    assert_eq!(transcript.lines(), vec!["ping", "status", "exit"]);
    assert_eq!(report.errors, 0);
    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(report.lines_sent, 3);
    assert_eq!(report.lines_received, 3);
}

#[tokio::test]
async fn ping_exit_scenario() {
    let mock = MockBuilder::new()
        .reply("ping", &["pong"])
        .reply("exit", &["bye"])
        .build();
    let (mut pump, transcript) = pump_over(fast_profile(), mock);

    let report = pump.run(Script::from_text("ping\nexit\n")).await;

    assert_eq!(transcript.lines(), vec!["pong", "bye"]);
    assert_eq!(report.errors, 0);
    assert_eq!(report.exit_code(), 0);
    assert!(report.passed());
}

#[tokio::test]
async fn sensor_fault_counts_as_one_error() {
    let mock = MockBuilder::new()
        .reply("ping", &["ERROR: sensor fault"])
        .build();
    let (mut pump, _) = pump_over(fast_profile(), mock);

    let report = pump.run(Script::from_text("ping\n")).await;

    assert_eq!(report.errors, 1);
    assert_eq!(report.exit_code(), 1);
    assert!(!report.passed());
}

#[tokio::test]
async fn summary_overrides_accrued_errors() {
    let mock = MockBuilder::new()
        .reply("noisy", &["ERROR: one", "ERROR: two", "ERROR: three"])
        .reply("finish", &["3 tests ran, 1 failed"])
        .build();
    let (mut pump, _) = pump_over(fast_profile(), mock);

    let report = pump.run(Script::from_text("noisy\nfinish\n")).await;

    // Three errors accrued, then the device's own verdict replaced
    // them wholesale.
    assert_eq!(report.errors, 1);
}

#[tokio::test]
async fn trailing_summary_is_picked_up_by_final_drain() {
    let mock = MockBuilder::new()
        .reply("go", &["running"])
        .stage_late(&["2 tests ran, 2 failed"])
        .build();
    let (mut pump, transcript) = pump_over(fast_profile(), mock);

    let report = pump.run(Script::from_text("go\n")).await;

    assert_eq!(transcript.lines(), vec!["running", "2 tests ran, 2 failed"]);
    assert_eq!(report.errors, 2);
    assert_eq!(report.outcome, Outcome::Completed);
}

#[tokio::test]
async fn bounded_drain_stops_once_summary_arrives() {
    let mock = MockBuilder::new()
        .stage_late(&["5 tests ran, 0 failed"])
        .build();
    let (mut pump, _) = pump_over(fast_profile(), mock);
    pump.set_test_timeout(Duration::from_secs(30));

    let started = std::time::Instant::now();
    let report = pump.run(Script::from_text("go\n")).await;

    // The deadline was half a minute away; the summary ended the
    // drain long before that.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.errors, 0);
    assert!(report.passed());
}

#[tokio::test]
async fn single_disconnect_recovers_with_one_reconnect() {
    let mock = MockBuilder::new().echo().deny_writable(1).build();
    let recorder = mock.recorder();
    let (mut pump, transcript) = pump_over(fast_profile(), mock);

    let report = pump.run(Script::from_text("hello\n")).await;

    assert_eq!(recorder.reconnects(), 1);
    assert_eq!(recorder.commands(), vec!["hello"]);
    assert_eq!(transcript.lines(), vec!["hello"]);
    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(report.errors, 0);
}

#[tokio::test]
async fn unrecoverable_disconnect_aborts_the_run() {
    let mock = MockBuilder::new()
        .deny_writable(5)
        .reconnect_fails()
        .build();
    let recorder = mock.recorder();
    let (mut pump, _) = pump_over(fast_profile(), mock);

    let report = pump.run(Script::from_text("hello\nworld\n")).await;

    // One reconnect attempt, then give up; the rest of the script is
    // never sent, but the run still reports a defined failure.
    assert_eq!(recorder.reconnects(), 1);
    assert_eq!(recorder.commands(), Vec::<String>::new());
    assert_eq!(report.lines_sent, 0);
    assert_eq!(report.outcome, Outcome::Aborted);
    assert!(report.exit_code() > 0);
}

#[tokio::test]
async fn abort_keeps_already_accrued_errors() {
    let mock = MockBuilder::new()
        .reply("first", &["ERROR: early fault"])
        .die_after_commands(1)
        .reconnect_fails()
        .build();
    let (mut pump, transcript) = pump_over(fast_profile(), mock);

    let report = pump.run(Script::from_text("first\nsecond\n")).await;

    assert_eq!(report.outcome, Outcome::Aborted);
    assert_eq!(report.lines_sent, 1);
    // The failure before the disconnect is not lost.
    assert_eq!(report.errors, 1);
    assert_eq!(transcript.lines(), vec!["ERROR: early fault"]);
}

#[tokio::test]
async fn blank_script_line_sends_bare_terminator() {
    let mock = MockBuilder::new().build();
    let recorder = mock.recorder();
    let (mut pump, _) = pump_over(fast_profile(), mock);

    let report = pump.run(Script::from_text("ping\n\n")).await;

    assert_eq!(recorder.commands(), vec!["ping", ""]);
    assert_eq!(report.lines_sent, 2);
}

#[tokio::test]
async fn long_command_is_chunked_on_the_wire() {
    let mock = MockBuilder::new().build();
    let recorder = mock.recorder();
    let (mut pump, _) = pump_over(fast_profile(), mock);

    let long = "x".repeat(300);
    pump.run(Script::from_text(&format!("{long}\n"))).await;

    // 300 bytes of command plus \r\n, in 128 byte chunks.
    assert_eq!(recorder.write_sizes(), vec![128, 128, 46]);
}

#[tokio::test]
async fn settle_rule_delays_first_read() {
    let mut profile = fast_profile();
    profile.special_rules = vec![SpecialRule {
        trigger: "send_telemetry".into(),
        action: SpecialAction::SettleDelay(Duration::from_millis(50)),
    }];

    let mock = MockBuilder::new().reply("send_telemetry", &["ack"]).build();
    let (mut pump, transcript) = pump_over(profile, mock);

    let started = std::time::Instant::now();
    let report = pump.run(Script::from_text("send_telemetry hi\n")).await;

    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(transcript.lines(), vec!["ack"]);
    assert_eq!(report.errors, 0);
}

#[tokio::test]
async fn await_output_rule_waits_for_minimum_bytes() {
    let mut profile = fast_profile();
    profile.special_rules = vec![SpecialRule {
        trigger: "exit".into(),
        action: SpecialAction::AwaitOutput {
            wait: Duration::from_millis(5),
            min_bytes: 4,
        },
    }];

    // The goodbye burst is longer than min_bytes and pending by the
    // time the rule polls, so the rule is satisfied immediately.
    let mock = MockBuilder::new().reply("exit", &["goodbye"]).build();
    let (mut pump, transcript) = pump_over(profile, mock);

    let report = pump.run(Script::from_text("exit\n")).await;

    assert_eq!(transcript.lines(), vec!["goodbye"]);
    assert_eq!(report.errors, 0);
}

#[tokio::test]
async fn setup_marker_is_awaited_and_kept_out_of_transcript() {
    let mock = MockBuilder::new()
        .banner(&["booting", "radio up", "Setup complete"])
        .build();
    let (mut pump, transcript) = pump_over(fast_profile(), mock);

    pump.await_setup().await.unwrap();

    // Banner lines are logged, not transcribed.
    assert_eq!(transcript.contents(), "");
}

#[tokio::test]
async fn missing_setup_marker_fails_setup() {
    // fast_profile keeps the mxchip marker but shrinks boot_wait, so a
    // silent device fails setup in milliseconds.
    let mock = MockBuilder::new().build();
    let (mut pump, _) = pump_over(fast_profile(), mock);

    let err = pump.await_setup().await.unwrap_err();

    assert!(err.to_string().contains("setup"));
}

#[tokio::test]
async fn reset_after_run_does_not_touch_the_verdict() {
    let mock = MockBuilder::new()
        .reply("ping", &["pong"])
        .reply("reset", &["rebooting"])
        .build();
    let recorder = mock.recorder();
    let (mut pump, transcript) = pump_over(fast_profile(), mock);

    let report = pump.run(Script::from_text("ping\n")).await;
    pump.reset_device().await.unwrap();

    assert_eq!(recorder.commands(), vec!["ping", "reset"]);
    assert_eq!(report.errors, 0);
    // The reboot banner is discarded, not transcribed.
    assert_eq!(transcript.lines(), vec!["pong"]);
}

#[tokio::test]
async fn partial_line_without_terminator_still_counts() {
    // A device cut off mid-sentence: the final fragment has no
    // delimiter but is still transcribed and classified.
    let mock = MockBuilder::new()
        .raw_banner(b"ERROR: died mid-sen")
        .build();
    let (mut pump, transcript) = pump_over(fast_profile(), mock);

    let report = pump.run(Script::from_text("")).await;

    assert_eq!(report.lines_sent, 0);
    assert_eq!(transcript.lines(), vec!["ERROR: died mid-sen"]);
    assert_eq!(report.errors, 1);
    assert_eq!(report.lines_received, 1);
}
