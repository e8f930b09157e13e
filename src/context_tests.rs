use crate::host::ToastKind;
use crate::storage::KeyValueStore;
use crate::testutil::context_fixture;
use rhai::Dynamic;
use serde_json::json;

fn err_text(result: Result<Dynamic, Box<rhai::EvalAltResult>>) -> String {
    result.expect_err("call should be denied").to_string()
}

#[test]
fn granted_storage_writes_under_the_plugin_prefix() {
    let fx = context_fixture();
    fx.run(&["storage"], r#"ctx.storage.set_item("mood", "happy");"#)
        .unwrap();
    assert_eq!(
        fx.kv.get("plugin_test.plugin_mood").as_deref(),
        Some("happy")
    );
}

#[test]
fn storage_without_grant_is_denied_with_capability_and_operation() {
    let fx = context_fixture();
    let text = err_text(fx.run(&[], r#"ctx.storage.set_item("k", "v");"#));
    assert!(text.contains("'storage'"), "got: {text}");
    assert!(text.contains("storage.set_item"), "got: {text}");
    assert!(fx.kv.keys().is_empty());
}

#[test]
fn missing_storage_key_reads_as_unit() {
    let fx = context_fixture();
    fx.run(
        &["storage"],
        r#"
        let v = ctx.storage.get_item("nope");
        if v != () { throw "expected unit" }
        "#,
    )
    .unwrap();
}

#[test]
fn storage_json_round_trips_through_the_script() {
    let fx = context_fixture();
    fx.run(
        &["storage"],
        r#"
        ctx.storage.set_json("state", #{ level: 3, name: "Mochi" });
        let state = ctx.storage.get_json("state");
        if state.level != 3 { throw "level" }
        if state.name != "Mochi" { throw "name" }
        "#,
    )
    .unwrap();
}

#[test]
fn plugins_cannot_read_each_others_storage() {
    let fx = context_fixture();
    fx.run_as("aaa", &["storage"], r#"ctx.storage.set_item("k", "secret");"#)
        .unwrap();
    fx.run_as(
        "bbb",
        &["storage"],
        r#"if ctx.storage.get_item("k") != () { throw "leaked" }"#,
    )
    .unwrap();
}

#[test]
fn data_read_grant_exposes_rows_but_not_writes() {
    let fx = context_fixture();
    fx.run(
        &["data:read"],
        r#"
        let rows = ctx.data.records();
        if rows.len() != 1 { throw "rows" }
        if rows[0].note != "lunch" { throw rows[0].note }
        if ctx.data.accounts()[0].name != "cash" { throw "account" }
        "#,
    )
    .unwrap();

    let text = err_text(fx.run(
        &["data:read"],
        r#"ctx.data.add_record(#{ kind: "expense", amount: 1.0 });"#,
    ));
    assert!(text.contains("'data:write'"), "got: {text}");
    assert!(text.contains("data.add_record"), "got: {text}");
    assert!(fx.data.added_records.lock().unwrap().is_empty());
}

#[test]
fn data_write_grant_allows_inserts_but_not_reads() {
    let fx = context_fixture();
    fx.run(
        &["data:write"],
        r#"
        let id = ctx.data.add_record(#{
            kind: "expense",
            amount: 5.0,
            category: "food",
            account: "cash",
            note: "tea",
            date: "2026-08-30"
        });
        if id != 1 { throw "id" }
        "#,
    )
    .unwrap();
    assert_eq!(fx.data.added_records.lock().unwrap()[0].note, "tea");

    let text = err_text(fx.run(&["data:write"], "ctx.data.records();"));
    assert!(text.contains("'data:read'"), "got: {text}");
}

#[test]
fn write_denial_is_uniform_across_grant_combinations() {
    for caps in [&[][..], &["storage"][..], &["ui", "network"][..]] {
        let fx = context_fixture();
        let text = err_text(fx.run(caps, r#"ctx.data.add_debt(#{ name: "x" });"#));
        assert!(text.contains("'data:write'"), "caps {caps:?}: {text}");
        assert!(fx.data.added_debts.lock().unwrap().is_empty());
    }
}

#[test]
fn granted_ui_reaches_the_host_shell() {
    let fx = context_fixture();
    fx.run(
        &["ui"],
        r#"
        ctx.ui.show_toast("hello");
        ctx.ui.show_toast("saved", "success");
        ctx.ui.navigate("stats");
        if !ctx.ui.confirm("sure?") { throw "confirm" }
        ctx.ui.open_add_transaction(#{ kind: "expense", amount: 12.5 });
        "#,
    )
    .unwrap();

    let toasts = fx.ui.toasts.lock().unwrap();
    assert_eq!(toasts[0], ("hello".to_string(), ToastKind::Info));
    assert_eq!(toasts[1], ("saved".to_string(), ToastKind::Success));
    assert_eq!(fx.ui.navigations.lock().unwrap()[0], "stats");
    let prefills = fx.ui.prefills.lock().unwrap();
    assert_eq!(prefills[0], json!({ "kind": "expense", "amount": 12.5 }));
}

#[test]
fn ui_without_grant_is_denied() {
    let fx = context_fixture();
    let text = err_text(fx.run(&["storage"], r#"ctx.ui.show_toast("hi");"#));
    assert!(text.contains("'ui'"), "got: {text}");
    assert!(fx.ui.toasts.lock().unwrap().is_empty());
}

#[test]
fn page_registration_requires_the_ui_capability() {
    let fx = context_fixture();
    let text = err_text(fx.run(&[], r#"ctx.ui.register_page("pet", "Pet", || "<p></p>");"#));
    assert!(text.contains("ui.register_page"), "got: {text}");
    assert!(!fx.extensions.has_page("pet"));
}

#[test]
fn network_denial_sends_no_request() {
    let fx = context_fixture();
    let text = err_text(fx.run(&[], r#"ctx.net.get("https://example.test/rates");"#));
    assert!(text.contains("'network'"), "got: {text}");
    assert!(text.contains("net.get"), "got: {text}");
    assert!(fx.net.requests.lock().unwrap().is_empty());
}

#[test]
fn granted_network_fetches_through_the_host() {
    let fx = context_fixture();
    fx.run(
        &["network"],
        r#"
        let body = ctx.net.get("https://example.test/ping");
        if body != "pong" { throw body }
        "#,
    )
    .unwrap();
    assert_eq!(fx.net.requests.lock().unwrap()[0], "https://example.test/ping");
}

#[test]
fn events_and_charts_need_no_grant() {
    let fx = context_fixture();
    fx.run(
        &[],
        r#"
        ctx.events.on("record:added", |payload| payload);
        let svg = ctx.charts.render(#{ type: "bar", values: [1, 2, 3] });
        if !svg.contains("svg") { throw svg }
        "#,
    )
    .unwrap();

    let out = fx.extensions.trigger("record:added", json!({ "amount": 9 }));
    assert_eq!(out, Some(json!({ "amount": 9 })));
}

#[test]
fn app_identity_is_visible_to_every_plugin() {
    let fx = context_fixture();
    fx.run(
        &[],
        r#"
        if ctx.app_name != "Wabi Ledger" { throw ctx.app_name }
        if ctx.version != "2.1.0" { throw ctx.version }
        "#,
    )
    .unwrap();
}

#[test]
fn permission_errors_are_catchable_in_script() {
    let fx = context_fixture();
    fx.run(
        &[],
        r#"
        let caught = "";
        try {
            ctx.storage.set_item("k", "v");
        } catch (e) {
            caught = e;
        }
        if !caught.contains("storage") { throw "not caught" }
        "#,
    )
    .unwrap();
}
