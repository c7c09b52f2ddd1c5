use super::*;

use dbgp_proto::CommandArgs;

#[tokio::test]
async fn the_init_packet_is_forwarded_untranslated() {
    let fixture = spawn_proxy().await;
    let session = pair(&fixture).await;

    // Byte-identical content, including the cache path in fileuri.
    assert_eq!(session.init, Document::parse(&init_xml(IDEKEY)).unwrap());
}

#[tokio::test]
async fn stack_filenames_are_rewritten_toward_the_ide() {
    let fixture = spawn_proxy().await;
    let mut session = pair(&fixture).await;

    let url = cache_url(&fixture, "src/foo.php");
    let xml = format!(
        r#"<response xmlns="urn:debugger_protocol_v1" xmlns:xdebug="https://xdebug.org/dbgp/xdebug" command="stack_get" transaction_id="4"><stack level="0" filename="{url}" lineno="3" where="{{main}}"/><xdebug:message filename="{url}" lineno="3"/></response>"#
    );
    session
        .engine
        .write_all(&dbgp_proto::engine::encode(&Document::parse(&xml).unwrap()))
        .await
        .unwrap();

    let packet = within(read_packet(&mut session.ide, &mut session.ide_decoder))
        .await
        .unwrap();
    let expected = project_url(&fixture, "src/foo.php");
    let children: Vec<_> = packet.root.child_elements().collect();
    assert_eq!(children.len(), 2);
    for child in children {
        assert_eq!(child.attribute("filename"), Some(expected.as_str()));
        assert_eq!(child.attribute("lineno"), Some("3"));
    }
}

#[tokio::test]
async fn filename_free_packets_are_forwarded_equivalently() {
    let fixture = spawn_proxy().await;
    let mut session = pair(&fixture).await;

    let xml = r#"<response xmlns="urn:debugger_protocol_v1" command="run" transaction_id="3" status="break" reason="ok"/>"#;
    let sent = Document::parse(xml).unwrap();
    session
        .engine
        .write_all(&dbgp_proto::engine::encode(&sent))
        .await
        .unwrap();

    let received = within(read_packet(&mut session.ide, &mut session.ide_decoder))
        .await
        .unwrap();
    assert_eq!(received, sent);
}

#[tokio::test]
async fn stale_cache_paths_reach_the_ide_unchanged() {
    let fixture = spawn_proxy().await;
    let mut session = pair(&fixture).await;

    // Right shape, wrong hash: the project file has different content now.
    let url = format!(
        "file://{}/src/foo.php_{}.php",
        fixture.cache_root.display(),
        "0".repeat(32)
    );
    let xml = format!(
        r#"<response command="stack_get" transaction_id="5"><stack level="0" filename="{url}" lineno="3"/></response>"#
    );
    session
        .engine
        .write_all(&dbgp_proto::engine::encode(&Document::parse(&xml).unwrap()))
        .await
        .unwrap();

    let packet = within(read_packet(&mut session.ide, &mut session.ide_decoder))
        .await
        .unwrap();
    let children: Vec<_> = packet.root.child_elements().collect();
    assert_eq!(children[0].attribute("filename"), Some(url.as_str()));
}

#[tokio::test]
async fn breakpoint_filenames_are_rewritten_toward_the_engine() {
    let fixture = spawn_proxy().await;
    let mut session = pair(&fixture).await;

    let line = format!(
        "breakpoint_set -i 5 -t line -f {} -n 14\0",
        project_url(&fixture, "src/foo.php")
    );
    session.ide.write_all(line.as_bytes()).await.unwrap();

    let command = within(read_command(&mut session.engine, &mut session.engine_decoder))
        .await
        .unwrap();
    assert_eq!(command.name, "breakpoint_set");
    let args = CommandArgs::parse(&command.args).unwrap();
    assert_eq!(args.get("f"), Some(cache_url(&fixture, "src/foo.php").as_str()));
    assert_eq!(args.get("i"), Some("5"));
    assert_eq!(args.get("t"), Some("line"));
    assert_eq!(args.get("n"), Some("14"));
}

#[tokio::test]
async fn untranslatable_breakpoints_are_forwarded_as_sent() {
    let fixture = spawn_proxy().await;
    let mut session = pair(&fixture).await;

    let args = "-i 6 -t line -f file:///usr/share/php/pear.php -n 2";
    session
        .ide
        .write_all(format!("breakpoint_set {args}\0").as_bytes())
        .await
        .unwrap();

    let command = within(read_command(&mut session.engine, &mut session.engine_decoder))
        .await
        .unwrap();
    assert_eq!(command.name, "breakpoint_set");
    assert_eq!(command.args, args);
}

#[tokio::test]
async fn non_breakpoint_commands_pass_through_verbatim() {
    let fixture = spawn_proxy().await;
    let mut session = pair(&fixture).await;

    session
        .ide
        .write_all(b"run -i 8\0eval -i 9 -- c29tZSBjb2Rl\0")
        .await
        .unwrap();

    let run = within(read_command(&mut session.engine, &mut session.engine_decoder))
        .await
        .unwrap();
    assert_eq!(run.name, "run");
    assert_eq!(run.args, "-i 8");

    let eval = within(read_command(&mut session.engine, &mut session.engine_decoder))
        .await
        .unwrap();
    assert_eq!(eval.name, "eval");
    assert_eq!(eval.args, "-i 9 -- c29tZSBjb2Rl");
}

#[tokio::test]
async fn malformed_breakpoints_close_both_ends() {
    let fixture = spawn_proxy().await;
    let mut session = pair(&fixture).await;

    session
        .ide
        .write_all(b"breakpoint_set -i 5 -t line -n 3\0")
        .await
        .unwrap();

    expect_closed(&mut session.engine).await;
    expect_closed(&mut session.ide).await;
}

#[tokio::test]
async fn garbled_engine_framing_closes_the_pair() {
    let fixture = spawn_proxy().await;
    let mut session = pair(&fixture).await;

    // Not a decimal length prefix; the stream cannot be resynchronized.
    session.engine.write_all(b"xx\0<oops/>\0").await.unwrap();

    expect_closed(&mut session.ide).await;
    expect_closed(&mut session.engine).await;
}

#[tokio::test]
async fn an_engine_close_cascades_to_the_ide() {
    let fixture = spawn_proxy().await;
    let mut session = pair(&fixture).await;

    drop(session.engine);
    expect_closed(&mut session.ide).await;
}

#[tokio::test]
async fn an_ide_close_cascades_to_the_engine() {
    let fixture = spawn_proxy().await;
    let mut session = pair(&fixture).await;

    drop(session.ide);
    expect_closed(&mut session.engine).await;
}

#[tokio::test]
async fn a_silent_engine_is_dropped_at_the_handshake_timeout() {
    let fixture = spawn_proxy_with(|config| {
        config.limits.first_packet_timeout_ms = 100;
    })
    .await;

    let mut engine = TcpStream::connect(fixture.server.debug_addr()).await.unwrap();
    expect_closed(&mut engine).await;
}

#[tokio::test]
async fn packets_split_across_writes_are_reassembled() {
    let fixture = spawn_proxy().await;
    let mut session = pair(&fixture).await;

    let url = cache_url(&fixture, "src/foo.php");
    let xml = format!(
        r#"<response command="stack_get" transaction_id="6"><stack level="0" filename="{url}" lineno="7"/></response>"#
    );
    let bytes = dbgp_proto::engine::encode(&Document::parse(&xml).unwrap());
    let (head, tail) = bytes.split_at(bytes.len() / 2);

    session.engine.write_all(head).await.unwrap();
    session.engine.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.engine.write_all(tail).await.unwrap();

    let packet = within(read_packet(&mut session.ide, &mut session.ide_decoder))
        .await
        .unwrap();
    let children: Vec<_> = packet.root.child_elements().collect();
    assert_eq!(
        children[0].attribute("filename"),
        Some(project_url(&fixture, "src/foo.php").as_str())
    );
}
