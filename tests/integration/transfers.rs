use crate::*;

/// Five bytes, one chunk: the file arrives intact and the completion
/// callback fires once with a text MIME type.
#[tokio::test(flavor = "multi_thread")]
async fn small_text_file_transfers_intact() {
    let send_dir = temp_dir("small-send");
    let recv_dir = temp_dir("small-recv");
    let source = send_dir.join("greeting.txt");
    std::fs::write(&source, b"hello").unwrap();

    let (mut listener, port, received) = start_listener(&recv_dir, false, false).await;

    let mut transmitter = FileTransmitter::new(sender_config(port, 65536, false));
    transmitter.start_transfer(&source).unwrap();
    let progress = run_to_completion(&mut transmitter).await;

    assert!(progress.done, "error: {:?}", progress.error);
    assert_eq!(progress.chunks_sent, 1);
    assert_eq!(progress.total_chunks, 1);
    assert_eq!(progress.bytes_sent, 5);

    wait_until("completion callback", || !received.lock().unwrap().is_empty()).await;
    let files = received.lock().unwrap().clone();
    assert_eq!(files.len(), 1);
    let (path, mime) = &files[0];
    assert_eq!(std::fs::read(path).unwrap(), b"hello");
    assert!(mime.starts_with("text/"), "mime was {mime}");

    listener.stop().await;
    let _ = std::fs::remove_dir_all(&send_dir);
    let _ = std::fs::remove_dir_all(&recv_dir);
}

/// An empty file still completes the protocol and lands as a zero-byte
/// destination.
#[tokio::test(flavor = "multi_thread")]
async fn empty_file_lands_empty() {
    let send_dir = temp_dir("empty-send");
    let recv_dir = temp_dir("empty-recv");
    let source = send_dir.join("nothing.bin");
    std::fs::write(&source, b"").unwrap();

    let (mut listener, port, received) = start_listener(&recv_dir, false, false).await;

    let mut transmitter = FileTransmitter::new(sender_config(port, 65536, false));
    transmitter.start_transfer(&source).unwrap();
    let progress = run_to_completion(&mut transmitter).await;

    assert!(progress.done, "error: {:?}", progress.error);
    assert_eq!(progress.total_chunks, 1);
    assert_eq!(progress.total_bytes, 0);

    wait_until("completion callback", || !received.lock().unwrap().is_empty()).await;
    let (path, _) = received.lock().unwrap()[0].clone();
    assert_eq!(std::fs::metadata(path).unwrap().len(), 0);

    listener.stop().await;
    let _ = std::fs::remove_dir_all(&send_dir);
    let _ = std::fs::remove_dir_all(&recv_dir);
}

/// A file of exactly one chunk size goes out as exactly one chunk.
#[tokio::test(flavor = "multi_thread")]
async fn exact_chunk_boundary_is_one_chunk() {
    let send_dir = temp_dir("boundary-send");
    let recv_dir = temp_dir("boundary-recv");
    let content: Vec<u8> = (0..65536u32).map(|i| (i % 251) as u8).collect();
    let source = send_dir.join("boundary.bin");
    std::fs::write(&source, &content).unwrap();

    let (mut listener, port, received) = start_listener(&recv_dir, false, false).await;

    let mut transmitter = FileTransmitter::new(sender_config(port, 65536, false));
    transmitter.start_transfer(&source).unwrap();
    let progress = run_to_completion(&mut transmitter).await;

    assert!(progress.done, "error: {:?}", progress.error);
    assert_eq!(progress.chunks_sent, 1);
    assert_eq!(progress.total_chunks, 1);
    assert_eq!(progress.bytes_sent, 65536);

    wait_until("completion callback", || !received.lock().unwrap().is_empty()).await;
    let (path, _) = received.lock().unwrap()[0].clone();
    assert_eq!(std::fs::read(path).unwrap(), content);

    listener.stop().await;
    let _ = std::fs::remove_dir_all(&send_dir);
    let _ = std::fs::remove_dir_all(&recv_dir);
}

/// Multi-chunk transfer: destination bytes equal the source chunks in
/// order, concatenated.
#[tokio::test(flavor = "multi_thread")]
async fn multi_chunk_content_is_ordered() {
    let send_dir = temp_dir("multi-send");
    let recv_dir = temp_dir("multi-recv");
    let content: Vec<u8> = (0..100_000u32).map(|i| (i.wrapping_mul(31) % 253) as u8).collect();
    let source = send_dir.join("payload.bin");
    std::fs::write(&source, &content).unwrap();

    let (mut listener, port, received) = start_listener(&recv_dir, false, false).await;

    let mut transmitter = FileTransmitter::new(sender_config(port, 4096, false));
    transmitter.start_transfer(&source).unwrap();
    let progress = run_to_completion(&mut transmitter).await;

    assert!(progress.done, "error: {:?}", progress.error);
    assert_eq!(progress.chunks_sent, 25);
    assert_eq!(progress.bytes_sent, 100_000);

    wait_until("completion callback", || !received.lock().unwrap().is_empty()).await;
    let (path, _) = received.lock().unwrap()[0].clone();
    assert_eq!(std::fs::read(path).unwrap(), content);

    listener.stop().await;
    let _ = std::fs::remove_dir_all(&send_dir);
    let _ = std::fs::remove_dir_all(&recv_dir);
}

/// A colliding filename lands as `name_1.ext` and leaves the original
/// untouched.
#[tokio::test(flavor = "multi_thread")]
async fn name_collision_gets_suffixed() {
    let send_dir = temp_dir("collide-send");
    let recv_dir = temp_dir("collide-recv");
    std::fs::write(recv_dir.join("report.pdf"), b"original").unwrap();
    let source = send_dir.join("report.pdf");
    std::fs::write(&source, b"new version").unwrap();

    let (mut listener, port, received) = start_listener(&recv_dir, false, false).await;

    let mut transmitter = FileTransmitter::new(sender_config(port, 65536, false));
    transmitter.start_transfer(&source).unwrap();
    let progress = run_to_completion(&mut transmitter).await;
    assert!(progress.done, "error: {:?}", progress.error);

    wait_until("completion callback", || !received.lock().unwrap().is_empty()).await;
    let (path, _) = received.lock().unwrap()[0].clone();
    assert_eq!(path, recv_dir.join("report_1.pdf"));
    assert_eq!(std::fs::read(&path).unwrap(), b"new version");
    assert_eq!(std::fs::read(recv_dir.join("report.pdf")).unwrap(), b"original");

    listener.stop().await;
    let _ = std::fs::remove_dir_all(&send_dir);
    let _ = std::fs::remove_dir_all(&recv_dir);
}

/// End-to-end with encryption negotiated on both sides.
#[tokio::test(flavor = "multi_thread")]
async fn encrypted_transfer_round_trips() {
    let send_dir = temp_dir("enc-send");
    let recv_dir = temp_dir("enc-recv");
    let content: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
    let source = send_dir.join("secret.bin");
    std::fs::write(&source, &content).unwrap();

    let (mut listener, port, received) = start_listener(&recv_dir, true, false).await;

    let mut transmitter = FileTransmitter::new(sender_config(port, 4096, true));
    transmitter.start_transfer(&source).unwrap();
    let progress = run_to_completion(&mut transmitter).await;
    assert!(progress.done, "error: {:?}", progress.error);

    wait_until("completion callback", || !received.lock().unwrap().is_empty()).await;
    let (path, _) = received.lock().unwrap()[0].clone();
    assert_eq!(std::fs::read(path).unwrap(), content);

    listener.stop().await;
    let _ = std::fs::remove_dir_all(&send_dir);
    let _ = std::fs::remove_dir_all(&recv_dir);
}

/// A receiver with encryption disabled refuses an encrypted handshake,
/// and the refusal reaches the sender's progress channel.
#[tokio::test(flavor = "multi_thread")]
async fn encryption_refused_when_not_accepted() {
    let send_dir = temp_dir("refuse-send");
    let recv_dir = temp_dir("refuse-recv");
    let source = send_dir.join("secret.txt");
    std::fs::write(&source, b"confidential").unwrap();

    let (mut listener, port, received) = start_listener(&recv_dir, false, false).await;

    let mut transmitter = FileTransmitter::new(sender_config(port, 65536, true));
    transmitter.start_transfer(&source).unwrap();
    let progress = run_to_completion(&mut transmitter).await;

    assert!(!progress.done);
    let error = progress.error.expect("refusal should surface as an error");
    assert!(error.contains("Encryption not accepted"), "error was: {error}");
    assert!(received.lock().unwrap().is_empty());

    listener.stop().await;
    let _ = std::fs::remove_dir_all(&send_dir);
    let _ = std::fs::remove_dir_all(&recv_dir);
}

/// Opting into dated subdirectories places the file under YYYY-MM-DD.
#[tokio::test(flavor = "multi_thread")]
async fn dated_subdir_placement() {
    let send_dir = temp_dir("dated-send");
    let recv_dir = temp_dir("dated-recv");
    let source = send_dir.join("note.txt");
    std::fs::write(&source, b"filed by date").unwrap();

    let (mut listener, port, received) = start_listener(&recv_dir, false, true).await;

    let mut transmitter = FileTransmitter::new(sender_config(port, 65536, false));
    transmitter.start_transfer(&source).unwrap();
    let progress = run_to_completion(&mut transmitter).await;
    assert!(progress.done, "error: {:?}", progress.error);

    wait_until("completion callback", || !received.lock().unwrap().is_empty()).await;
    let (path, _) = received.lock().unwrap()[0].clone();
    let subdir = path.parent().unwrap();
    assert_eq!(subdir.parent().unwrap(), recv_dir);
    let name = subdir.file_name().unwrap().to_str().unwrap();
    assert_eq!(name.len(), 10, "subdir {name} should be YYYY-MM-DD");

    listener.stop().await;
    let _ = std::fs::remove_dir_all(&send_dir);
    let _ = std::fs::remove_dir_all(&recv_dir);
}
