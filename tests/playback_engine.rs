//! Playback engine scenarios exercised through the public API
//!
//! Drives the sequence store and the block engine the way an audio host
//! would: commands in, sample-stamped events out.

use mymidi_player::messaging::channels::{create_command_channel, create_notification_channel};
use mymidi_player::sequencer::player::SharedRecordState;
use mymidi_player::sequencer::time::TICKS_PER_QUARTER;
use mymidi_player::{
    EngineEvent, ErrorPolicy, MidiEvent, MidiPlayer, MidiSequence, TimeSignature, Track,
    write_event_list,
};
use std::sync::Arc;

fn note_on(note: u8) -> MidiEvent {
    MidiEvent::NoteOn {
        note,
        velocity: 100,
    }
}

fn note_off(note: u8) -> MidiEvent {
    MidiEvent::NoteOff { note }
}

fn sequence_with_bars(events: Vec<(MidiEvent, f64)>, num_bars: f64) -> Arc<MidiSequence> {
    let sequence = MidiSequence::new();
    sequence.create_empty_track();
    sequence.swap_current_track(Track::from_events(events));

    let mut signature = TimeSignature::default();
    signature.num_bars = num_bars;
    sequence.set_length_from_signature(signature);
    Arc::new(sequence)
}

fn test_player() -> MidiPlayer {
    let (_command_tx, command_rx) = create_command_channel(64);
    let (notification_tx, _notification_rx) = create_notification_channel(64);

    let mut player = MidiPlayer::new(
        command_rx,
        notification_tx,
        Arc::new(SharedRecordState::default()),
    );
    player.prepare_to_play(44100.0, 512);
    player
}

#[test]
fn one_bar_sequence_length_and_event_list() {
    let sequence = sequence_with_bars(
        vec![(note_on(60), 0.0), (note_off(60), 480.0)],
        1.0,
    );

    // One bar of 4/4 at 960 PPQ
    assert_eq!(sequence.length_ticks(), 4.0 * TICKS_PER_QUARTER);

    let list = sequence
        .event_list(44100.0, 120.0, ErrorPolicy::Strict)
        .unwrap();

    assert_eq!(list.len(), 2);
    assert!(list[0].is_note_on());
    assert_eq!(list[0].timestamp, 0);
    assert!(list[1].is_note_off());
    assert_eq!(list[1].timestamp, 11025);
    assert_eq!(list[0].event_id, list[1].event_id);
}

#[test]
fn every_event_delivered_exactly_once_in_order() {
    let sequence = sequence_with_bars(
        vec![
            (note_on(60), 0.0),
            (note_off(60), 300.0),
            (note_on(62), 700.0),
            (note_off(62), 1100.0),
            (note_on(64), 1900.0),
            (note_off(64), 2400.0),
            (note_on(65), 3000.0),
            (note_off(65), 3500.0),
        ],
        1.0,
    );

    let length = sequence.length_ticks();
    let mut delivered = Vec::new();

    // Partition [0, length) into uneven block ranges
    let mut start = 0.0;
    for step in [100.0, 250.0, 57.0, 400.0].iter().cycle() {
        if start >= length {
            break;
        }

        let end = (start + step).min(length);
        while let Some(event) = sequence.get_next_event(start..end) {
            delivered.push(event.tick);
        }
        start = end;
    }

    let expected = vec![0.0, 300.0, 700.0, 1100.0, 1900.0, 2400.0, 3000.0, 3500.0];
    assert_eq!(delivered, expected);

    // Non-decreasing order is implied by equality, but make it explicit
    assert!(delivered.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn round_trip_preserves_pairing_and_order() {
    let sequence = sequence_with_bars(
        vec![
            (note_on(60), 0.0),
            (note_off(60), 480.0),
            (note_on(64), 240.0),
            (note_off(64), 720.0),
            (note_on(67), 960.0),
            (note_off(67), 1440.0),
        ],
        1.0,
    );

    let list = sequence
        .event_list(44100.0, 120.0, ErrorPolicy::Strict)
        .unwrap();

    let destination = MidiSequence::new();
    destination.create_empty_track();
    let mut signature = TimeSignature::default();
    signature.num_bars = 1.0;
    destination.set_length_from_signature(signature);

    write_event_list(&destination, &list, 120.0, 44100.0);

    let round_tripped = destination
        .event_list(44100.0, 120.0, ErrorPolicy::Strict)
        .unwrap();

    // Same pair count
    let pairs = |events: &[EngineEvent]| events.iter().filter(|e| e.is_note_on()).count();
    assert_eq!(pairs(&round_tripped), pairs(&list));
    assert_eq!(round_tripped.len(), list.len());

    // Same relative ordering of note numbers
    let order = |events: &[EngineEvent]| {
        events
            .iter()
            .map(|e| (e.is_note_on(), e.note_number()))
            .collect::<Vec<_>>()
    };
    assert_eq!(order(&round_tripped), order(&list));

    // Every pair still shares one id
    for event in round_tripped.iter().filter(|e| e.is_note_on()) {
        assert!(
            round_tripped
                .iter()
                .any(|e| e.is_note_off() && e.event_id == event.event_id)
        );
    }
}

#[test]
fn block_playback_emits_sample_accurate_pair() {
    let mut player = test_player();
    player.add_sequence(sequence_with_bars(
        vec![(note_on(60), 0.0), (note_off(60), 480.0)],
        1.0,
    ));

    assert!(player.play(0));

    let mut out = Vec::new();
    player.advance(16384, &mut out);

    assert_eq!(out.len(), 2);
    assert_eq!(out[0].timestamp, 0);
    assert!(out[0].is_note_on());
    assert_eq!(out[1].timestamp, 11025);
    assert!(out[1].is_note_off());
    assert_eq!(out[0].event_id, out[1].event_id);
    assert!(out.iter().all(|e| e.artificial));
}

#[test]
fn no_duplicate_delivery_within_one_block() {
    let mut player = test_player();
    player.add_sequence(sequence_with_bars(
        vec![(note_on(60), 0.0), (note_off(60), 480.0)],
        1.0,
    ));
    player.play(0);

    // A block longer than the whole sequence: the cursor wraps onto the
    // already-delivered note-on and must stop instead of flooding.
    let mut out = Vec::new();
    player.advance(131072, &mut out);

    let note_ons = out.iter().filter(|e| e.is_note_on()).count();
    assert_eq!(note_ons, 1);
}

#[test]
fn getting_length_twice_is_identical() {
    let sequence = sequence_with_bars(
        vec![(note_on(60), 0.0), (note_off(60), 480.0)],
        2.0,
    );

    assert_eq!(sequence.length_ticks(), sequence.length_ticks());
    assert_eq!(sequence.length_quarters(), sequence.length_quarters());
}

#[test]
fn concurrent_swap_never_shows_partial_track() {
    let sequence = sequence_with_bars(
        vec![(note_on(60), 0.0), (note_off(60), 480.0)],
        1.0,
    );
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let writer = {
        let sequence = Arc::clone(&sequence);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            for round in 0..300 {
                let track = if round % 2 == 0 {
                    Track::from_events([(note_on(60), 0.0), (note_off(60), 480.0)])
                } else {
                    Track::from_events([
                        (note_on(60), 0.0),
                        (note_off(60), 480.0),
                        (note_on(64), 960.0),
                        (note_off(64), 1440.0),
                        (note_on(67), 1920.0),
                        (note_off(67), 2400.0),
                    ])
                };
                sequence.swap_current_track(track);
            }
            done.store(true, std::sync::atomic::Ordering::Release);
        })
    };

    while !done.load(std::sync::atomic::Ordering::Acquire) {
        let count = sequence.num_events();
        assert!(
            count == 2 || count == 6,
            "reader observed partial track with {} events",
            count
        );
    }

    writer.join().unwrap();
}

#[test]
fn loop_wrap_does_not_redeliver_tail_events() {
    let sequence = sequence_with_bars(
        vec![
            (note_on(60), 0.0),
            (note_off(60), 400.0),
            (note_on(64), 3000.0),
            (note_off(64), 3500.0),
        ],
        1.0,
    );

    // First pass: everything up to the loop end
    assert_eq!(sequence.get_next_event(0.0..500.0).unwrap().tick, 0.0);
    assert_eq!(sequence.get_next_event(0.0..500.0).unwrap().tick, 400.0);
    assert_eq!(sequence.get_next_event(2900.0..3100.0).unwrap().tick, 3000.0);
    assert_eq!(sequence.get_next_event(3400.0..3600.0).unwrap().tick, 3500.0);

    // Crossing the loop boundary lands on the note-on at the loop start
    let wrapped = sequence.get_next_event(3800.0..3900.0).unwrap();
    assert_eq!(wrapped.tick, 0.0);
    assert!(wrapped.message.is_note_on());

    // Asking again must not redeliver pre-wrap events out of order
    assert!(sequence.get_next_event(3800.0..3900.0).is_none());

    // The cursor continues normally inside the new pass
    assert_eq!(sequence.get_next_event(380.0..420.0).unwrap().tick, 400.0);
}
