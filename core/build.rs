use std::fmt::Write as _;
use std::path::PathBuf;

use oxmq_scriptgen::{CommandScript, Preprocessor};

fn main() {
    let manifest_dir = match std::env::var_os("CARGO_MANIFEST_DIR") {
        Some(value) => PathBuf::from(value),
        None => panic!("CARGO_MANIFEST_DIR is not set for build script"),
    };
    let out_dir = match std::env::var_os("OUT_DIR") {
        Some(value) => PathBuf::from(value),
        None => panic!("OUT_DIR is not set for build script"),
    };

    let lua_root = manifest_dir.join("src").join("lua");
    println!("cargo:rerun-if-changed={}", lua_root.display());

    let commands = Preprocessor::new(&lua_root)
        .expand_commands_dir(&lua_root)
        .unwrap_or_else(|error| panic!("failed to assemble Lua scripts: {error}"));
    if commands.is_empty() {
        panic!("no Lua commands found under {}", lua_root.display());
    }

    let mut generated = String::new();
    let mut slice_entries = String::new();
    for command in &commands {
        validate_lua_script(command);

        let blob_path = out_dir.join(format!("{}.lua", command.name));
        std::fs::write(&blob_path, &command.body).unwrap_or_else(|error| {
            panic!("failed to write {}: {error}", blob_path.display())
        });

        let const_name = screaming_snake(&command.name);
        let _ = writeln!(generated, "pub const {const_name}: ScriptDef = ScriptDef {{");
        let _ = writeln!(generated, "    name: {:?},", command.name);
        let _ = match command.num_keys {
            Some(count) => writeln!(generated, "    num_keys: Some({count}),"),
            None => writeln!(generated, "    num_keys: None,"),
        };
        let _ = writeln!(
            generated,
            "    source: include_str!(concat!(env!(\"OUT_DIR\"), \"/{}.lua\")),",
            command.name
        );
        let _ = writeln!(generated, "}};");
        let _ = writeln!(generated);
        let _ = writeln!(slice_entries, "    &{const_name},");
    }
    let _ = writeln!(generated, "pub const COMMANDS: &[&ScriptDef] = &[");
    generated.push_str(&slice_entries);
    let _ = writeln!(generated, "];");

    let gen_path = out_dir.join("scripts_gen.rs");
    std::fs::write(&gen_path, generated)
        .unwrap_or_else(|error| panic!("failed to write {}: {error}", gen_path.display()));
}

fn validate_lua_script(command: &CommandScript) {
    let parse_result =
        full_moon::parse_fallible(&command.body, full_moon::LuaVersion::lua51()).into_result();
    if let Err(errors) = parse_result {
        let mut details = String::new();
        for error in errors {
            let (start, _) = error.range();
            let _ = writeln!(
                details,
                "line {}, col {}: {}",
                start.line(),
                start.character(),
                error.error_message()
            );
        }
        panic!(
            "invalid Lua syntax in assembled command '{}':\n{details}",
            command.name
        );
    }
}

fn screaming_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() && !out.is_empty() {
            out.push('_');
        }
        out.push(ch.to_ascii_uppercase());
    }
    out
}
