mod common;

use common::{open_streamer, EventRecorder};
use grblstream_communication::StreamerConfig;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Action {
    Enqueue(String),
    Ack,
    Error,
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => "G[0-3] X[0-9]{1,4}( Y[0-9]{1,4})?".prop_map(Action::Enqueue),
        2 => Just(Action::Ack),
        1 => Just(Action::Error),
    ]
}

fn apply(streamer: &grblstream_communication::CommandStreamer, action: &Action) {
    match action {
        Action::Enqueue(text) => streamer.enqueue(text.clone()),
        Action::Ack => streamer.handle_response("ok"),
        Action::Error => streamer.handle_response("error:1"),
    }
}

proptest! {
    #[test]
    fn accounting_matches_in_flight_bytes(
        max_buffer in 16usize..128,
        actions in prop::collection::vec(action(), 1..60),
    ) {
        let (streamer, _connection) = open_streamer(StreamerConfig::with_max_buffer(max_buffer));

        for action in &actions {
            apply(&streamer, action);
            let in_flight: usize = streamer.active_commands().iter().map(|c| c.wire_len()).sum();
            prop_assert_eq!(streamer.buffer_used(), in_flight);
            prop_assert!(streamer.buffer_used() <= max_buffer);
        }
    }

    #[test]
    fn completions_follow_send_order(
        commands in prop::collection::vec("G1 X[0-9]{1,5}", 1..40),
    ) {
        let (streamer, connection) = open_streamer(StreamerConfig::default());
        let recorder = EventRecorder::new();
        streamer.add_listener(recorder.clone());

        for command in &commands {
            streamer.enqueue(command.clone());
        }
        for _ in 0..commands.len() {
            streamer.handle_response("ok");
        }

        let completed: Vec<String> = recorder.completed().iter().map(|c| c.wire.clone()).collect();
        prop_assert_eq!(&completed, &connection.sent());
        let expected: Vec<String> = commands.iter().map(|c| format!("{}\n", c)).collect();
        prop_assert_eq!(completed, expected);
        prop_assert_eq!(streamer.buffer_used(), 0);
    }

    #[test]
    fn single_step_never_exceeds_one_in_flight(
        actions in prop::collection::vec(action(), 1..60),
    ) {
        let (streamer, _connection) = open_streamer(StreamerConfig::default());
        streamer.set_single_step_mode(true);

        for action in &actions {
            apply(&streamer, action);
            prop_assert!(streamer.active_count() <= 1);
        }
    }
}
