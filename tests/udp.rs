use std::{
    net::UdpSocket,
    thread::{self, JoinHandle},
    time::Duration,
};

use gear_vision::{
    error::HandoffError,
    handoff::{Controller, ControllerVariables, Value, VariableController, VariableTable, VariableTransport},
    udp::{serve_one, Envelope, Reply, Request, Response, UdpTransport, ARRAY_CHUNK},
};

/// Serves `table` on a loopback port until the client goes quiet.
fn spawn_controller(mut table: VariableTable) -> (String, JoinHandle<VariableTable>) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();
    let address = socket.local_addr().unwrap().to_string();

    let handle = thread::spawn(move || {
        let mut buf = vec![0; 65_507];
        loop {
            match serve_one(&socket, &mut table, &mut buf) {
                Ok(_) => continue,
                Err(HandoffError::Io(_)) => return table,
                Err(err) => panic!("bad request: {}", err),
            }
        }
    });

    (address, handle)
}

fn connect(address: &str, timeout_ms: u64) -> UdpTransport {
    UdpTransport::connect(0, address, Duration::from_millis(timeout_ms)).unwrap()
}

#[test]
fn controller_round_trip_over_loopback() {
    let variables = ControllerVariables::default();
    let mut table = VariableTable::recording();
    table.set(&variables.start_signal, Value::Bool(true));
    let (address, server) = spawn_controller(table);

    let mut controller = VariableController::new(connect(&address, 1000), variables);
    assert!(controller.read_start_signal().unwrap());
    controller.clear_start_signal().unwrap();
    assert!(!controller.read_start_signal().unwrap());

    let count = 2 * ARRAY_CHUNK + 100;
    let distances: Vec<f64> = (0..count).map(|i| i as f64 * 0.5).collect();
    let angles: Vec<f64> = (0..count).map(|i| i as f64 * 0.25).collect();
    controller.send_coordinates(&distances, &angles).unwrap();
    controller.send_status("Gear found").unwrap();
    controller.signal_ready_for_restart(true).unwrap();
    drop(controller);

    let table = server.join().unwrap();
    assert_eq!(table.reals("Main.x_coords"), distances);
    assert_eq!(table.reals("Main.y_coords"), angles);
    assert_eq!(table.text("Main.status_message"), Some("Gear found"));
    assert!(table.bool("Main.restart"));

    // Three chunks per array.
    let array_writes = table
        .log()
        .iter()
        .filter(|(name, _)| name.starts_with("Main.x_coords"))
        .count();
    assert_eq!(array_writes, 3);
}

#[test]
fn unknown_variable_is_rejected_by_the_controller() {
    let (address, server) = spawn_controller(VariableTable::new());
    let mut transport = connect(&address, 1000);

    assert!(matches!(
        transport.read("Main.nothing"),
        Err(HandoffError::Rejected { .. })
    ));

    drop(transport);
    server.join().unwrap();
}

#[test]
fn silent_controller_times_out() {
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut transport = connect(&silent.local_addr().unwrap().to_string(), 50);

    assert!(matches!(
        transport.write("Main.restart", Value::Bool(true)),
        Err(HandoffError::Timeout { timeout_ms: 50 })
    ));
}

#[test]
fn stale_replies_are_skipped() {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let address = socket.local_addr().unwrap().to_string();

    let server = thread::spawn(move || {
        let mut buf = vec![0; 65_507];
        let (len, peer) = socket.recv_from(&mut buf).unwrap();
        let envelope: Envelope = rmp_serde::from_slice(&buf[..len]).unwrap();
        assert!(matches!(envelope.body, Request::Read { .. }));

        let stale = Reply {
            id: envelope.id.wrapping_add(100),
            body: Response::Ack,
        };
        let fresh = Reply {
            id: envelope.id,
            body: Response::Value(Value::Real(4.5)),
        };
        for reply in [stale, fresh] {
            socket
                .send_to(&rmp_serde::to_vec(&reply).unwrap(), peer)
                .unwrap();
        }
    });

    let mut transport = connect(&address, 1000);
    assert_eq!(transport.read("Main.anything").unwrap(), Value::Real(4.5));
    server.join().unwrap();
}

#[test]
fn late_stale_reply_does_not_shrink_the_next_window() {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let address = socket.local_addr().unwrap().to_string();

    let server = thread::spawn(move || {
        let mut buf = vec![0; 65_507];
        let mut reply_to = |delay: Duration, stale: bool| {
            let (len, peer) = socket.recv_from(&mut buf).unwrap();
            let envelope: Envelope = rmp_serde::from_slice(&buf[..len]).unwrap();
            thread::sleep(delay);

            let mut replies = vec![Reply {
                id: envelope.id,
                body: Response::Ack,
            }];
            if stale {
                replies.insert(
                    0,
                    Reply {
                        id: envelope.id.wrapping_add(100),
                        body: Response::Ack,
                    },
                );
            }
            for reply in replies {
                socket
                    .send_to(&rmp_serde::to_vec(&reply).unwrap(), peer)
                    .unwrap();
            }
        };

        reply_to(Duration::from_millis(600), true);
        reply_to(Duration::from_millis(700), false);
    });

    let mut transport = connect(&address, 1000);
    transport.write("Main.restart", Value::Bool(true)).unwrap();
    // Answered after 700 ms, inside a full 1000 ms window but outside the
    // ~400 ms left over from the first request.
    transport.write("Main.restart", Value::Bool(false)).unwrap();
    server.join().unwrap();
}
