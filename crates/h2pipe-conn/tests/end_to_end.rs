use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use h2pipe_conn::{
    handler_fn, ClientRequest, ClientSession, Connection, ConnectionControl, ConnectionOptions,
    Request, Response, Server, ServerOptions, ShutdownOutcome,
};
use h2pipe_frame::{Flags, FrameCodec, FrameType, OwnedFrame, CONNECTION_PREFACE};
use h2pipe_hpack::{Decoder, Encoder, HeaderField};
use h2pipe_transport::{Accepted, ConnectionInfo, IpcStream, MemoryTransport};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

async fn route(request: Request) -> Response {
    match request.path.as_str() {
        "/" => Response::text("Hello, World!"),
        "/echo" => {
            let trace = request.header("x-trace").map(Bytes::copy_from_slice);
            let body = request.body.collect().await;
            let mut response = Response::ok().with_body(body);
            if let Some(trace) = trace {
                response = response.with_header("x-trace", trace);
            }
            response
        }
        "/stream" => {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(async move {
                for part in ["one ", "two ", "three"] {
                    if tx.send(Bytes::from_static(part.as_bytes())).await.is_err() {
                        return;
                    }
                }
            });
            Response::ok().with_stream(rx)
        }
        "/filler" => (0..10).fold(Response::ok(), |response, n| {
            response.with_header(&format!("x-filler-{n}"), vec![b'v'; 600])
        }),
        _ => Response::new(404),
    }
}

fn options() -> ServerOptions {
    let mut options = ServerOptions::default();
    options.listener.accept_loops = 2;
    options.shutdown_timeout = Duration::from_secs(3);
    options
}

async fn connect(server: &Server<MemoryTransport>) -> ClientSession<h2pipe_transport::IpcStream> {
    let stream = server
        .transport()
        .connector()
        .connect()
        .await
        .expect("connect should succeed");
    ClientSession::connect(stream)
        .await
        .expect("handshake should succeed")
}

#[tokio::test]
async fn get_returns_hello_world() {
    let server = Server::start(MemoryTransport::new("e2e-hello"), handler_fn(route), options())
        .expect("server should start");
    let mut client = connect(&server).await;

    let response = client
        .request(ClientRequest::get("/").with_authority("localhost"))
        .await
        .expect("request should succeed");
    assert_eq!(response.status, 200);
    assert_eq!(response.body, Bytes::from_static(b"Hello, World!"));
    assert_eq!(response.header("content-type"), Some("text/plain"));

    // The literal content-type went into the server encoder's table, which the
    // client decoder mirrors.
    let table = client.decoder().table();
    assert_eq!(table.len(), 1);
    assert_eq!(
        table.iter().next(),
        Some(&HeaderField::new(
            Bytes::from_static(b"content-type"),
            Bytes::from_static(b"text/plain")
        ))
    );

    // The second response references the entry instead of resending it.
    let again = client
        .request(ClientRequest::get("/"))
        .await
        .expect("second request should succeed");
    assert_eq!(again.body, Bytes::from_static(b"Hello, World!"));
    assert_eq!(again.header("content-type"), Some("text/plain"));
    assert_eq!(client.decoder().table().len(), 1);

    client.close().await.expect("close should succeed");
    assert_eq!(server.shutdown().await, ShutdownOutcome::Graceful);
}

#[tokio::test]
async fn request_body_and_headers_reach_the_handler() {
    let server = Server::start(MemoryTransport::new("e2e-echo"), handler_fn(route), options())
        .expect("server should start");
    let mut client = connect(&server).await;

    // Larger than one frame and than the default stream window.
    let payload = Bytes::from(vec![b'x'; 100_000]);
    let response = client
        .request(
            ClientRequest::new("POST", "/echo")
                .with_header("X-Trace", "abc-123")
                .with_body(payload.clone()),
        )
        .await
        .expect("echo should succeed");
    assert_eq!(response.status, 200);
    assert_eq!(response.header("x-trace"), Some("abc-123"));
    assert_eq!(response.body, payload);

    drop(client);
    assert_eq!(server.shutdown().await, ShutdownOutcome::Graceful);
}

#[tokio::test]
async fn streamed_response_and_unknown_route() {
    let server = Server::start(MemoryTransport::new("e2e-stream"), handler_fn(route), options())
        .expect("server should start");
    let mut client = connect(&server).await;

    let streamed = client
        .request(ClientRequest::get("/stream"))
        .await
        .expect("stream should succeed");
    assert_eq!(streamed.body, Bytes::from_static(b"one two three"));

    let missing = client
        .request(ClientRequest::get("/missing"))
        .await
        .expect("404 should still be a response");
    assert_eq!(missing.status, 404);
    assert!(missing.body.is_empty());

    assert_eq!(server.connection_count(), 1);
    drop(client);
    assert_eq!(server.shutdown().await, ShutdownOutcome::Graceful);
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn several_clients_at_once() {
    let server = Server::start(MemoryTransport::new("e2e-many"), handler_fn(route), options())
        .expect("server should start");

    let mut clients = Vec::new();
    for _ in 0..4 {
        clients.push(connect(&server).await);
    }
    for client in &mut clients {
        let response = client
            .request(ClientRequest::get("/"))
            .await
            .expect("request should succeed");
        assert_eq!(response.status, 200);
    }
    let mut ids: Vec<String> = server.connections().into_iter().map(|c| c.id).collect();
    ids.sort();
    assert_eq!(ids, vec!["conn-1", "conn-2", "conn-3", "conn-4"]);

    drop(clients);
    assert_eq!(server.shutdown().await, ShutdownOutcome::Graceful);
}

#[tokio::test]
async fn large_local_table_limit_still_matches_the_client_decoder() {
    let mut options = options();
    options.connection.limits.header_table_size = 16_384;
    let server = Server::start(MemoryTransport::new("e2e-table"), handler_fn(route), options)
        .expect("server should start");
    let mut client = connect(&server).await;

    // Each response inserts more than the 4096 bytes the client decoder holds.
    for _ in 0..2 {
        let response = client
            .request(ClientRequest::get("/filler"))
            .await
            .expect("the client decoder should follow every response block");
        assert_eq!(response.status, 200);
        for n in 0..10 {
            let value = response.header(&format!("x-filler-{n}"));
            assert_eq!(value.map(str::len), Some(600));
        }
    }
    assert!(client.decoder().table().size() <= 4096);

    drop(client);
    assert_eq!(server.shutdown().await, ShutdownOutcome::Graceful);
}

#[tokio::test]
async fn raw_frames_with_empty_end_stream_data() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let connection = Connection::new(
        "raw-1",
        Accepted {
            stream: IpcStream::from_memory(server),
            info: ConnectionInfo::new("memory:raw", "memory:client"),
        },
    );
    let control = ConnectionControl::new();
    let task = tokio::spawn(connection.serve(
        Arc::new(handler_fn(route)),
        ConnectionOptions::default(),
        control,
    ));

    let mut framed = Framed::new(client, FrameCodec::new());
    framed.get_mut().write_all(CONNECTION_PREFACE).await.unwrap();
    framed
        .send(OwnedFrame::new(FrameType::Settings, Flags::empty(), 0, Bytes::new()))
        .await
        .unwrap();
    let request = [
        HeaderField::new(&b":method"[..], &b"GET"[..]),
        HeaderField::new(&b":scheme"[..], &b"http"[..]),
        HeaderField::new(&b":authority"[..], &b"localhost"[..]),
        HeaderField::new(&b":path"[..], &b"/"[..]),
    ];
    let mut block = BytesMut::new();
    Encoder::new(4096).encode(&request, &mut block);
    framed
        .send(OwnedFrame::new(FrameType::Headers, Flags::END_HEADERS, 1, block.freeze()))
        .await
        .unwrap();
    framed
        .send(OwnedFrame::new(FrameType::Data, Flags::END_STREAM, 1, Bytes::new()))
        .await
        .unwrap();

    let mut decoder = Decoder::new(4096);
    let mut headers = Vec::new();
    let mut body = BytesMut::new();
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), framed.next())
            .await
            .expect("the server should answer")
            .expect("the server should keep the connection open")
            .expect("server frames should decode");
        match frame.kind() {
            FrameType::Settings if !frame.flags().contains(Flags::ACK) => {
                framed
                    .send(OwnedFrame::new(FrameType::Settings, Flags::ACK, 0, Bytes::new()))
                    .await
                    .unwrap();
            }
            FrameType::Headers => {
                assert_eq!(frame.stream_id(), 1);
                headers = decoder.decode(&frame.payload).unwrap();
            }
            FrameType::Data => {
                body.extend_from_slice(&frame.payload);
                if frame.flags().contains(Flags::END_STREAM) {
                    break;
                }
            }
            _ => {}
        }
    }
    let pairs: Vec<(&[u8], &[u8])> = headers
        .iter()
        .map(|field| (field.name.as_ref(), field.value.as_ref()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (&b":status"[..], &b"200"[..]),
            (&b"content-type"[..], &b"text/plain"[..]),
        ]
    );
    assert_eq!(body.freeze(), Bytes::from_static(b"Hello, World!"));

    drop(framed);
    let outcome = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("peer EOF should close the connection")
        .expect("connection task should not panic");
    assert!(outcome.is_graceful(), "unexpected outcome: {outcome:?}");
    assert_eq!(
        outcome.header_table,
        vec![HeaderField::new(
            Bytes::from_static(b"content-type"),
            Bytes::from_static(b"text/plain")
        )]
    );
    assert_eq!(outcome.header_table, decoder.table().iter().cloned().collect::<Vec<_>>());
}
