#![cfg(feature = "real-jvm-tests")]

use std::process::{Command, Stdio};

use jtrace_config::TracerConfig;
use jtrace_engine::{
    compile, trace, valid_breakpoint_lines, FormatOptions, TraceError, TraceSerializer,
    MAIN_EXIT_LINE,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn tool_available(name: &str) -> bool {
    Command::new(name)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

fn jdk() -> Option<TracerConfig> {
    let config = TracerConfig::default().with_env_overrides();
    let java = config.java.to_string_lossy().into_owned();
    let javac = config.javac.to_string_lossy().into_owned();
    if tool_available(&java) && tool_available(&javac) {
        Some(config)
    } else {
        eprintln!("skipping real JVM test: `{java}`/`{javac}` not available");
        None
    }
}

const HELLO: &str = "public class Main {
    public static void main(String[] args) {
        System.out.println(\"Hello world!\");
    }
}
";

#[tokio::test]
async fn hello_world_is_traced_at_main_exit() {
    let Some(config) = jdk() else { return };
    let program = compile(HELLO, &config).await.unwrap();
    let result = trace(&program, None, &config).await.unwrap();

    assert_eq!(result.keys().copied().collect::<Vec<_>>(), vec![MAIN_EXIT_LINE]);
    let snapshot = &result[&MAIN_EXIT_LINE][0];
    let doc = TraceSerializer::default().serialize(HELLO, snapshot);
    let step = &doc["trace"][0];
    assert_eq!(step["stdout"], json!("Hello world!\n"));
    assert_eq!(step["func_name"], json!("main"));
    assert_eq!(step["line"], json!(4));
}

#[tokio::test]
async fn breakpoint_listing_excludes_brace_only_lines() {
    let Some(config) = jdk() else { return };
    let source = "class Main { public static void main(String[] a) {\n\
                  System.out.println(1);\n\
                  }\n\
                  }\n";
    // A single public type is required, so make it public.
    let source = format!("public {source}");
    let program = compile(&source, &config).await.unwrap();
    let lines = valid_breakpoint_lines(&program, &config).await.unwrap();

    assert!(lines.contains(&1), "class declaration line: {lines:?}");
    assert!(lines.contains(&2), "println line: {lines:?}");
    assert!(!lines.contains(&4), "closing brace: {lines:?}");
}

#[tokio::test]
async fn locals_come_out_in_declaration_order() {
    let Some(config) = jdk() else { return };
    let source = "public class Main {
    public static void main(String[] args) {
        boolean z = true;
        byte b = 1;
        char c = 'c';
        short s = 2;
        int i = 3;
        long l = 4L;
        float f = 5.5f;
        double d = 6.25;
        String str = \"text\";
        Object o = new Object();
    }
}
";
    let program = compile(source, &config).await.unwrap();
    let result = trace(&program, None, &config).await.unwrap();
    let snapshot = &result[&MAIN_EXIT_LINE][0];

    let doc = TraceSerializer::default().serialize(source, snapshot);
    let frame = &doc["trace"][0]["stack_to_render"][0];
    assert_eq!(
        frame["ordered_varnames"],
        json!(["args", "z", "b", "c", "s", "i", "l", "f", "d", "str", "o"])
    );
    assert_eq!(frame["encoded_locals"]["c"], json!(["CHAR-LITERAL", "c"]));
    assert_eq!(frame["encoded_locals"]["f"], json!(["NUMBER-LITERAL", "5.5"]));
    assert_eq!(frame["encoded_locals"]["d"], json!(["NUMBER-LITERAL", "6.25"]));

    let without_args = TraceSerializer::new(FormatOptions {
        remove_main_args: true,
        ..FormatOptions::default()
    })
    .serialize(source, snapshot);
    assert_eq!(
        without_args["trace"][0]["stack_to_render"][0]["ordered_varnames"][0],
        json!("z")
    );
}

#[tokio::test]
async fn inline_strings_toggle_changes_string_sites() {
    let Some(config) = jdk() else { return };
    let source = "public class Main {
    public static void main(String[] args) {
        String greeting = \"hi\";
        System.out.println(greeting);
    }
}
";
    let program = compile(source, &config).await.unwrap();
    let result = trace(&program, None, &config).await.unwrap();
    let snapshot = &result[&MAIN_EXIT_LINE][0];

    let referenced = TraceSerializer::default().serialize(source, snapshot);
    let site = &referenced["trace"][0]["stack_to_render"][0]["encoded_locals"]["greeting"];
    assert_eq!(site[0], json!("REF"));
    let id = site[1].to_string();
    assert_eq!(
        referenced["trace"][0]["heap"][&id],
        json!(["INSTANCE", "String", ["___NO_LABEL!___", "hi"]])
    );

    let inlined = TraceSerializer::new(FormatOptions {
        inline_strings: true,
        ..FormatOptions::default()
    })
    .serialize(source, snapshot);
    assert_eq!(
        inlined["trace"][0]["stack_to_render"][0]["encoded_locals"]["greeting"],
        json!("hi")
    );
    assert_eq!(inlined["trace"][0]["heap"].get(&id), None);
}

#[tokio::test]
async fn compile_errors_carry_javac_diagnostics() {
    let Some(config) = jdk() else { return };
    let err = compile("public class Main { public static void main(String[] a) { int x = } }", &config)
        .await
        .unwrap_err();
    assert!(matches!(err, TraceError::Compilation { .. }), "{err}");
    assert!(err.to_string().contains("error"), "{err}");
}
