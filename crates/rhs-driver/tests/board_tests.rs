// SPDX-License-Identifier: AGPL-3.0-only

//! Board behaviour against the simulated transport

use rhs_chip::board::{BoardPort, MAX_NUM_DATA_STREAMS};
use rhs_chip::command::{AuxCmdSlot, COMMAND_RAM_WORDS};
use rhs_chip::frame::SAMPLES_PER_DATA_BLOCK;
use rhs_chip::rates::SampleRate;
use rhs_chip::stim::{StimRegister, StimShape, StimTrigger, TriggerSource, NEVER};
use rhs_driver::calibration::calibration_quantum;
use rhs_driver::transports::MockTransport;
use rhs_driver::{
    queue_to_file, Board, DataBlock, DataStreamEnableMap, RateReliability, RhsError,
    SequencerState, StimTiming,
};
use std::collections::VecDeque;

fn open() -> (Board<MockTransport>, MockTransport) {
    let mock = MockTransport::new();
    let board = Board::open(mock.clone()).expect("mock board opens");
    (board, mock)
}

#[test]
fn test_enabled_stream_count() {
    let (board, _mock) = open();
    let mut guard = board.lock();
    for n in 0..=MAX_NUM_DATA_STREAMS {
        guard
            .set_data_streams(DataStreamEnableMap::first(n).expect("count in range"))
            .expect("stream write");
        assert_eq!(guard.num_enabled_data_streams(), n);
        assert_eq!(
            guard.num_enabled_data_streams(),
            guard.data_streams().enabled_streams().count()
        );
    }

    guard.set_data_stream_enabled(4, false).expect("disable stream 4");
    let remaining: Vec<usize> = guard.data_streams().enabled_streams().collect();
    assert_eq!(remaining, vec![0, 1, 2, 3, 5, 6, 7]);
}

#[test]
fn test_sample_rate_round_trip() {
    let (board, _mock) = open();
    let mut guard = board.lock();
    for rate in SampleRate::ALL {
        let reliability = guard.set_sample_rate(rate).expect("rate accepted");
        assert_eq!(reliability == RateReliability::Reliable, rate.is_reliable());
        assert_eq!(guard.sample_rate(), rate);
        assert_eq!(SampleRate::from_hz(guard.sample_rate_hz()), Some(rate));
    }
}

#[test]
fn test_cable_length_within_one_quantum() {
    let (board, _mock) = open();
    let mut guard = board.lock();
    for rate in [SampleRate::Hz15000, SampleRate::Hz20000, SampleRate::Hz30000] {
        guard.set_sample_rate(rate).expect("rate accepted");
        let quantum = calibration_quantum(rate);
        assert!((guard.calibration_quantum_meters() - quantum).abs() < 1e-12);
        for port in BoardPort::ALL {
            for meters in [0.5, 1.0, 2.0, 3.0, 5.0] {
                guard.set_cable_length_meters(port, meters).expect("cable write");
                let estimate =
                    guard.estimate_cable_length_meters(u32::from(guard.cable_delay(port)));
                assert!(
                    (estimate - meters).abs() <= quantum,
                    "{rate} port {port:?}: {meters} m estimated as {estimate} m"
                );
            }
        }
    }
}

#[test]
fn test_command_list_capacity() {
    let (board, mock) = open();
    let mut guard = board.lock();

    let full = vec![0x8000_0000u32; COMMAND_RAM_WORDS];
    guard
        .upload_command_list(&full, AuxCmdSlot::AuxCmd4)
        .expect("full RAM fits");

    mock.clear_ops();
    let over = vec![0u32; COMMAND_RAM_WORDS + 1];
    let err = guard
        .upload_command_list(&over, AuxCmdSlot::AuxCmd4)
        .expect_err("one word too many");
    assert!(matches!(err, RhsError::CommandListTooLong { .. }));
    assert!(mock.ops().is_empty(), "nothing sent for a rejected list");
}

#[test]
fn test_biphasic_leaves_phase3_neutral() {
    let (board, mock) = open();
    let timing = StimTiming {
        enable_amp_settle: true,
        pre_stim_amp_settle: 2,
        post_stim_amp_settle: 4,
        post_trigger_delay: 5,
        ..StimTiming::default()
    };
    let mut guard = board.lock();
    guard
        .configure_stim_pulses(0, 7, 1, StimShape::Biphasic, false, &timing)
        .expect("biphasic pulse");

    let active: Vec<StimRegister> = guard
        .stim_registers(0, 7)
        .expect("channel in range")
        .active_events()
        .collect();
    assert_eq!(
        active,
        vec![
            StimRegister::EventAmpSettleOn,
            StimRegister::EventAmpSettleOff,
            StimRegister::EventStartStim,
            StimRegister::EventStimPhase2,
            StimRegister::EventEndStim,
            StimRegister::EventEnd,
        ]
    );
    let phase3 = StimRegister::EventStimPhase3.address(0, 7).expect("address");
    assert_eq!(mock.stim_register(phase3), Some(NEVER));
}

#[test]
fn test_monophasic_leaves_phase2_and_phase3_neutral() {
    let (board, mock) = open();
    let mut guard = board.lock();
    guard
        .configure_stim_pulses(5, 0, 3, StimShape::Monophasic, true, &StimTiming::default())
        .expect("monophasic train");
    for reg in [StimRegister::EventStimPhase2, StimRegister::EventStimPhase3] {
        let addr = reg.address(5, 0).expect("address");
        assert_eq!(mock.stim_register(addr), Some(NEVER), "{reg:?}");
    }
    let repeat = StimRegister::EventRepeatStim.address(5, 0).expect("address");
    assert_eq!(mock.stim_register(repeat), Some(300));
}

#[test]
fn test_num_pulses_bounds() {
    let (board, _mock) = open();
    let mut guard = board.lock();
    let timing = StimTiming::default();
    assert!(guard
        .configure_stim_pulses(0, 0, 256, StimShape::Biphasic, false, &timing)
        .is_ok());
    for bad in [0, 257] {
        let err = guard
            .configure_stim_pulses(0, 0, bad, StimShape::Biphasic, false, &timing)
            .expect_err("pulse count rejected");
        assert!(matches!(err, RhsError::OutOfRange { what: "num_pulses", .. }));
    }
}

#[test]
fn test_read_data_blocks_never_exceeds_request() {
    let (board, mock) = open();
    let mut guard = board.lock();
    guard
        .set_data_streams(DataStreamEnableMap::first(2).expect("count"))
        .expect("streams");
    mock.set_running(true);
    mock.advance(7 * SAMPLES_PER_DATA_BLOCK as u32);

    let mut queue = VecDeque::new();
    for requested in [0, 1, 2, 10] {
        let before = queue.len();
        let got = guard.read_data_blocks(requested, &mut queue).expect("read");
        assert!(got <= requested);
        assert_eq!(queue.len() - before, got);
    }
    assert_eq!(queue.len(), 7);
    assert_eq!(guard.read_data_blocks(5, &mut queue).expect("empty read"), 0);
}

#[test]
fn test_recorded_blocks_read_back() {
    let (board, mock) = open();
    let mut guard = board.lock();
    guard
        .set_data_streams(DataStreamEnableMap::ports(&[BoardPort::B]))
        .expect("streams");
    guard.set_continuous_run_mode(true).expect("continuous");
    guard.run().expect("run");
    mock.advance(3 * SAMPLES_PER_DATA_BLOCK as u32);

    let mut queue = VecDeque::new();
    assert_eq!(guard.read_data_blocks(3, &mut queue).expect("read"), 3);
    let originals: Vec<DataBlock> = queue.iter().cloned().collect();

    let mut file = Vec::new();
    assert_eq!(queue_to_file(&mut queue, &mut file).expect("write"), 3);

    let mut reader = file.as_slice();
    let mut restored = Vec::new();
    while let Some(block) = DataBlock::read_from(&mut reader, 2).expect("parse") {
        restored.push(block);
    }
    assert_eq!(restored, originals);
}

#[test]
fn test_reset_sequencers_returns_every_channel_to_idle() {
    let (board, _mock) = open();
    let mut guard = board.lock();
    guard.set_stim_cmd_mode(true).expect("stim mode");
    for (stream, channel) in [(0, 0), (3, 15), (7, 8)] {
        guard
            .configure_stim_trigger(stream, channel, StimTrigger::edge(TriggerSource::KeyPress(2)))
            .expect("trigger");
        guard
            .configure_stim_pulses(stream, channel, 4, StimShape::Triphasic, false, &StimTiming::default())
            .expect("pulses");
    }
    assert_eq!(guard.set_manual_stim_trigger(2, true).expect("fire"), 3);
    assert!(matches!(
        guard.sequencer(3, 15).expect("channel").state(),
        SequencerState::Active { pulses_remaining: 4 }
    ));

    guard.reset_sequencers().expect("reset");
    for stream in 0..MAX_NUM_DATA_STREAMS {
        for channel in 0..16 {
            assert!(!guard.is_sequencer_enabled(stream, channel).expect("channel"));
        }
    }
}

#[test]
fn test_incomplete_configuration_is_armed_but_inert() {
    let (board, _mock) = open();
    let mut guard = board.lock();
    guard.set_stim_cmd_mode(true).expect("stim mode");

    // trigger only
    guard
        .configure_stim_trigger(1, 1, StimTrigger::edge(TriggerSource::KeyPress(0)))
        .expect("trigger");
    assert!(!guard.is_sequencer_enabled(1, 1).expect("channel"));
    assert_eq!(guard.set_manual_stim_trigger(0, true).expect("fire"), 0);
    guard.set_manual_stim_trigger(0, false).expect("release");

    // pulses without stim command mode
    guard.set_stim_cmd_mode(false).expect("stim mode off");
    guard
        .configure_stim_pulses(1, 1, 1, StimShape::Biphasic, false, &StimTiming::default())
        .expect("pulses");
    assert!(guard.sequencer(1, 1).expect("channel").is_configured());
    assert!(!guard.is_sequencer_enabled(1, 1).expect("channel"));
    assert_eq!(guard.set_manual_stim_trigger(0, true).expect("fire"), 0);
    guard.set_manual_stim_trigger(0, false).expect("release");

    guard.set_stim_cmd_mode(true).expect("stim mode on");
    assert_eq!(guard.sequencer(1, 1).expect("channel").state(), SequencerState::Armed);
    assert_eq!(guard.set_manual_stim_trigger(0, true).expect("fire"), 1);
}
