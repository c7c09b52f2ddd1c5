use super::*;

#[tokio::test]
async fn proxyinit_is_acknowledged_with_the_registered_endpoint() {
    let fixture = spawn_proxy().await;
    let mut stream = TcpStream::connect(fixture.server.registration_addr())
        .await
        .unwrap();
    stream
        .write_all(b"proxyinit -p 9000 -k testkey -m 1\0")
        .await
        .unwrap();

    let mut decoder = PacketDecoder::new();
    let ack = within(read_packet(&mut stream, &mut decoder))
        .await
        .expect("expected an acknowledgement packet");
    assert_eq!(ack.root.name, "proxyinit");
    assert_eq!(ack.root.attribute("success"), Some("1"));
    assert_eq!(ack.root.attribute("idekey"), Some(IDEKEY));
    assert_eq!(ack.root.attribute("address"), Some("127.0.0.1"));
    assert_eq!(ack.root.attribute("port"), Some("9000"));

    // One command per connection; the proxy hangs up after the ack.
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn unknown_commands_are_closed_without_a_response() {
    let fixture = spawn_proxy().await;
    let mut stream = TcpStream::connect(fixture.server.registration_addr())
        .await
        .unwrap();
    stream.write_all(b"proxystop -k testkey\0").await.unwrap();
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn malformed_proxyinit_is_closed_without_a_response() {
    let fixture = spawn_proxy().await;

    for line in [
        b"proxyinit -k testkey\0".as_slice(),
        b"proxyinit -p 9000\0".as_slice(),
        b"proxyinit -p notaport -k testkey\0".as_slice(),
        b"proxyinit -k one -k two -p 9000\0".as_slice(),
    ] {
        let mut stream = TcpStream::connect(fixture.server.registration_addr())
            .await
            .unwrap();
        stream.write_all(line).await.unwrap();
        expect_closed(&mut stream).await;
    }
}

#[tokio::test]
async fn engines_with_an_unregistered_key_are_disconnected() {
    let fixture = spawn_proxy().await;
    let mut engine = TcpStream::connect(fixture.server.debug_addr()).await.unwrap();
    engine.write_all(&init_packet("nobody")).await.unwrap();
    expect_closed(&mut engine).await;
}

#[tokio::test]
async fn re_registration_replaces_the_earlier_endpoint() {
    let fixture = spawn_proxy().await;

    let stale_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    register_ide(&fixture, stale_listener.local_addr().unwrap().port()).await;

    let fresh_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    register_ide(&fixture, fresh_listener.local_addr().unwrap().port()).await;

    let mut engine = TcpStream::connect(fixture.server.debug_addr()).await.unwrap();
    engine.write_all(&init_packet(IDEKEY)).await.unwrap();

    within(fresh_listener.accept()).await.unwrap();
    let unexpected =
        tokio::time::timeout(Duration::from_millis(300), stale_listener.accept()).await;
    assert!(unexpected.is_err(), "stale endpoint still received a session");
}

#[tokio::test]
async fn preregistered_ides_pair_without_wire_registration() {
    let ide_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ide_port = ide_listener.local_addr().unwrap().port();

    let fixture = spawn_proxy_with(|config| {
        config.prereg.push(dbgp_proxy::config::PreregisteredIde {
            key: IDEKEY.to_string(),
            host: "127.0.0.1".to_string(),
            port: ide_port,
        });
    })
    .await;

    let mut engine = TcpStream::connect(fixture.server.debug_addr()).await.unwrap();
    engine.write_all(&init_packet(IDEKEY)).await.unwrap();
    within(ide_listener.accept()).await.unwrap();
}
