//! Assembles self-contained Redis Lua scripts from modular source fragments.
//!
//! A fragment references another fragment with an `@include` comment
//! directive. Expansion is purely textual and deterministic: the same input
//! tree always yields byte-identical output, so the SHA of an assembled
//! script is a stable identity regardless of where it was assembled.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// Largest include depth worth supporting; deeper nesting is a cycle that
/// somehow escaped the stack check.
const MAX_INCLUDE_DEPTH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("include not found: {reference:?} (included from {in_file} at {line}:{column})")]
    IncludeNotFound {
        reference: String,
        in_file: PathBuf,
        line: usize,
        column: usize,
    },
    #[error("cyclic include of {path} (include path: {})", format_stack(stack))]
    Cycle { path: PathBuf, stack: Vec<PathBuf> },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("include nesting exceeds {MAX_INCLUDE_DEPTH} levels at {path}")]
    TooDeep { path: PathBuf },
}

fn format_stack(stack: &[PathBuf]) -> String {
    let mut out = String::new();
    for (index, entry) in stack.iter().enumerate() {
        if index > 0 {
            let _ = write!(out, " -> ");
        }
        let _ = write!(out, "{}", entry.display());
    }
    out
}

/// One assembled top-level command.
#[derive(Debug, Clone)]
pub struct CommandScript {
    pub name: String,
    /// Key count encoded in the filename as `name-<N>.lua`, when present.
    pub num_keys: Option<u8>,
    pub body: String,
}

fn include_directive() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^-{2,4}[ \t]*@include[ \t]+(?:"(?<reference>[^"']+)"|'(?<reference_sq>[^"']+)')[; \t]*$"#,
        )
        .expect("include directive pattern is valid")
    })
}

/// Splits `moveToFinished-14` into `("moveToFinished", Some(14))`.
pub fn parse_command_stem(stem: &str) -> (String, Option<u8>) {
    if let Some((name, suffix)) = stem.rsplit_once('-')
        && !name.is_empty()
        && let Ok(count) = suffix.parse::<u8>()
    {
        return (name.to_string(), Some(count));
    }
    (stem.to_string(), None)
}

pub struct Preprocessor {
    root: PathBuf,
    mappings: Vec<(String, PathBuf)>,
}

impl Preprocessor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mappings: Vec::new(),
        }
    }

    /// Registers a `<alias>` path mapping. A reference written as
    /// `<alias>/rest/of/path` resolves against the mapped directory.
    pub fn with_mapping(mut self, alias: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        self.mappings.push((alias.into(), target.into()));
        self
    }

    /// Assembles one top-level command file into a self-contained script.
    pub fn expand_file(&self, path: &Path) -> Result<String, PreprocessError> {
        let canonical = canonicalize(path)?;
        let mut stack = vec![canonical.clone()];
        let mut emitted = HashSet::new();
        emitted.insert(canonical.clone());
        let mut out = String::new();
        self.expand_into(&canonical, &mut stack, &mut emitted, &mut out)?;
        Ok(collapse_blank_runs(&out))
    }

    /// Assembles every `.lua` file directly under `dir`, in filename order.
    /// The `includes/` subdirectory is not emitted as commands.
    pub fn expand_commands_dir(&self, dir: &Path) -> Result<Vec<CommandScript>, PreprocessError> {
        let entries = std::fs::read_dir(dir).map_err(|source| PreprocessError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "lua"))
            .collect();
        paths.sort();

        let mut commands = Vec::with_capacity(paths.len());
        for path in paths {
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default();
            let (name, num_keys) = parse_command_stem(&stem);
            let body = self.expand_file(&path)?;
            commands.push(CommandScript {
                name,
                num_keys,
                body,
            });
        }
        Ok(commands)
    }

    fn expand_into(
        &self,
        canonical: &Path,
        stack: &mut Vec<PathBuf>,
        emitted: &mut HashSet<PathBuf>,
        out: &mut String,
    ) -> Result<(), PreprocessError> {
        if stack.len() > MAX_INCLUDE_DEPTH {
            return Err(PreprocessError::TooDeep {
                path: canonical.to_path_buf(),
            });
        }
        let source = std::fs::read_to_string(canonical).map_err(|source| PreprocessError::Io {
            path: canonical.to_path_buf(),
            source,
        })?;
        let including_dir = canonical
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        for (line_index, line) in source.lines().enumerate() {
            let Some(captures) = include_directive().captures(line) else {
                out.push_str(line);
                out.push('\n');
                continue;
            };
            let reference = captures
                .name("reference")
                .or_else(|| captures.name("reference_sq"))
                .expect("capture exists");
            let target = self.resolve_reference(reference.as_str(), &including_dir);
            let target = canonicalize(&target).map_err(|_| PreprocessError::IncludeNotFound {
                reference: reference.as_str().to_string(),
                in_file: canonical.to_path_buf(),
                line: line_index + 1,
                column: reference.start() + 1,
            })?;

            if stack.contains(&target) {
                return Err(PreprocessError::Cycle {
                    path: target,
                    stack: stack.clone(),
                });
            }
            // Include-once: later references within the same closure expand
            // to nothing.
            if !emitted.insert(target.clone()) {
                continue;
            }
            stack.push(target.clone());
            self.expand_into(&target, stack, emitted, out)?;
            stack.pop();
        }
        Ok(())
    }

    fn resolve_reference(&self, reference: &str, including_dir: &Path) -> PathBuf {
        let (base, rest) = if let Some(rest) = reference.strip_prefix("~/") {
            (self.root.clone(), rest)
        } else if let Some(mapped) = self.lookup_mapping(reference) {
            mapped
        } else {
            (including_dir.to_path_buf(), reference)
        };

        let mut path = base.join(rest);
        if path.extension().is_none_or(|ext| ext != "lua") {
            let mut with_ext = path.into_os_string();
            with_ext.push(".lua");
            path = PathBuf::from(with_ext);
        }
        path
    }

    fn lookup_mapping<'a>(&self, reference: &'a str) -> Option<(PathBuf, &'a str)> {
        let rest = reference.strip_prefix('<')?;
        let (alias, rest) = rest.split_once('>')?;
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        self.mappings
            .iter()
            .find(|(name, _)| name == alias)
            .map(|(_, target)| (target.clone(), rest))
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf, PreprocessError> {
    std::fs::canonicalize(path).map_err(|source| PreprocessError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Squeezes every run of whitespace-only lines down to a single blank line.
fn collapse_blank_runs(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut pending_blank = false;
    let mut seen_content = false;
    for line in body.lines() {
        if line.trim().is_empty() {
            pending_blank = seen_content;
            continue;
        }
        if pending_blank {
            out.push('\n');
            pending_blank = false;
        }
        out.push_str(line);
        out.push('\n');
        seen_content = true;
    }
    out
}
