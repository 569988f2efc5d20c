//! Tests for the wire codec.
//!
//! Validates framing, tag discrimination, ordering, and the fatal handling
//! of unknown tags and oversized frames.

use cloister::constants::MAX_FRAME_LEN;
use cloister::error::Error;
use cloister::wire::{
    CommandResult, Config, CopyRequest, ExecuteRequest, FrameReader, FrameWriter,
    InitFromDockerRequest, LogRecord, LogStream, Mount, Request, Response,
};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

// =============================================================================
// Round-Trip Tests
// =============================================================================

#[tokio::test]
async fn test_request_round_trip() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let mut writer: FrameWriter<_, Request> = FrameWriter::new(client);
    let mut reader: FrameReader<_, Request> = FrameReader::new(server);

    let frames = vec![
        Request::Config(Config {
            chroot: false,
            mounts: vec![Mount {
                host: PathBuf::from("/tmp/m"),
                container: PathBuf::from("/test"),
                writable: true,
            }],
        }),
        Request::Execute(ExecuteRequest {
            command: "echo hello".to_string(),
        }),
        Request::Copy(CopyRequest {
            src: PathBuf::from("/test/src"),
            dst: PathBuf::from("/test/dst"),
        }),
        Request::InitFromDocker(InitFromDockerRequest {
            image: "alpine".to_string(),
            tag: "3.18".to_string(),
        }),
    ];

    for frame in &frames {
        writer.send(frame).await.unwrap();
    }
    for frame in &frames {
        let received = reader.receive().await.unwrap();
        assert_eq!(&received, frame);
    }
}

#[tokio::test]
async fn test_response_round_trip() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let mut writer: FrameWriter<_, Response> = FrameWriter::new(client);
    let mut reader: FrameReader<_, Response> = FrameReader::new(server);

    let frames = vec![
        Response::Log(LogRecord {
            stream: LogStream::Out,
            text: "hello\n".to_string(),
        }),
        Response::Log(LogRecord {
            stream: LogStream::Err,
            text: "oops".to_string(),
        }),
        Response::Result(CommandResult {
            error: String::new(),
        }),
    ];

    for frame in &frames {
        writer.send(frame).await.unwrap();
    }
    for frame in &frames {
        let received = reader.receive().await.unwrap();
        assert_eq!(&received, frame);
    }
}

#[tokio::test]
async fn test_frames_arrive_in_send_order() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let mut writer: FrameWriter<_, Request> = FrameWriter::new(client);
    let mut reader: FrameReader<_, Request> = FrameReader::new(server);

    for i in 0..32 {
        writer
            .send(&Request::Execute(ExecuteRequest {
                command: format!("echo {i}"),
            }))
            .await
            .unwrap();
    }
    for i in 0..32 {
        match reader.receive().await.unwrap() {
            Request::Execute(req) => assert_eq!(req.command, format!("echo {i}")),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

// =============================================================================
// Tag Discrimination Tests
// =============================================================================

#[tokio::test]
async fn test_unknown_tag_is_fatal() {
    let (mut client, server) = tokio::io::duplex(4096);
    let mut reader: FrameReader<_, Request> = FrameReader::new(server);

    client
        .write_all(b"{\"frame\":\"frobnicate\"}\n")
        .await
        .unwrap();

    let err = reader.receive().await.unwrap_err();
    assert!(
        matches!(err, Error::MalformedFrame { .. }),
        "unknown tag should be a protocol error, got: {err:?}"
    );
}

#[tokio::test]
async fn test_response_tag_not_accepted_as_request() {
    // Registration is per-direction: a Result frame is not in the Request
    // family and must poison a Request reader.
    let (client, server) = tokio::io::duplex(4096);
    let mut writer: FrameWriter<_, Response> = FrameWriter::new(client);
    let mut reader: FrameReader<_, Request> = FrameReader::new(server);

    writer
        .send(&Response::Result(CommandResult {
            error: String::new(),
        }))
        .await
        .unwrap();

    let err = reader.receive().await.unwrap_err();
    assert!(matches!(err, Error::MalformedFrame { .. }));
}

#[tokio::test]
async fn test_garbage_line_is_fatal() {
    let (mut client, server) = tokio::io::duplex(4096);
    let mut reader: FrameReader<_, Request> = FrameReader::new(server);

    client.write_all(b"not json at all\n").await.unwrap();

    let err = reader.receive().await.unwrap_err();
    assert!(matches!(err, Error::MalformedFrame { .. }));
}

// =============================================================================
// Stream Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_eof_is_connection_closed() {
    let (client, server) = tokio::io::duplex(4096);
    let mut reader: FrameReader<_, Request> = FrameReader::new(server);
    drop(client);

    let err = reader.receive().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
}

#[tokio::test]
async fn test_oversized_frame_rejected_on_send() {
    let (client, _server) = tokio::io::duplex(4096);
    let mut writer: FrameWriter<_, Request> = FrameWriter::new(client);

    let err = writer
        .send(&Request::Execute(ExecuteRequest {
            command: "x".repeat(MAX_FRAME_LEN),
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FrameTooLarge { .. }));
}

// =============================================================================
// Encoding Details
// =============================================================================

#[test]
fn test_log_stream_encodes_as_integer() {
    let frame = Response::Log(LogRecord {
        stream: LogStream::Err,
        text: "x".to_string(),
    });
    let value = serde_json::to_value(&frame).unwrap();
    assert_eq!(value["frame"], "log");
    assert_eq!(value["stream"], 1);

    let frame = Response::Log(LogRecord {
        stream: LogStream::Out,
        text: "x".to_string(),
    });
    let value = serde_json::to_value(&frame).unwrap();
    assert_eq!(value["stream"], 0);
}

#[test]
fn test_unknown_log_stream_rejected() {
    let parsed: Result<Response, _> =
        serde_json::from_str(r#"{"frame":"log","stream":7,"text":"x"}"#);
    assert!(parsed.is_err());
}

#[test]
fn test_empty_result_means_success() {
    let parsed: Response = serde_json::from_str(r#"{"frame":"result","error":""}"#).unwrap();
    match parsed {
        Response::Result(result) => assert!(result.error.is_empty()),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[test]
fn test_config_defaults() {
    let parsed: Request = serde_json::from_str(r#"{"frame":"config"}"#).unwrap();
    match parsed {
        Request::Config(config) => {
            assert!(!config.chroot);
            assert!(config.mounts.is_empty());
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}
