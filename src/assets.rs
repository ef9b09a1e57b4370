//! File-asset resolution for a single test case.
//!
//! Merges per-test, legacy inline, and question-level file overrides
//! into the file set presented to the sandboxed program. Pure
//! functions; no shared state across calls.

use crate::sandbox::FileAssets;

/// Stdin and file set actually handed to the backend for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub stdin: String,
    pub file_assets: FileAssets,
}

/// Resolves the effective stdin and file set for one test case.
///
/// Precedence, highest first:
/// 1. the test case's own declared file assets,
/// 2. the legacy `"<filename>:content"` inline override,
/// 3. the question-level assets as the fallback base.
///
/// Whenever (1) or (2) supplies file content, stdin is cleared: a
/// program reading its data from files should not also receive the
/// override text on stdin.
pub fn resolve(
    input: &str,
    declared: Option<&FileAssets>,
    global_assets: &FileAssets,
) -> ResolvedInput {
    if let Some(declared) = declared {
        if !declared.is_empty() {
            let mut file_assets = global_assets.clone();
            for (name, content) in declared {
                file_assets.insert(name.clone(), content.clone());
            }
            return ResolvedInput {
                stdin: String::new(),
                file_assets,
            };
        }
    }

    if let Some((filename, content)) = parse_inline_override(input, global_assets) {
        let mut file_assets = global_assets.clone();
        file_assets.insert(filename, content);
        return ResolvedInput {
            stdin: String::new(),
            file_assets,
        };
    }

    ResolvedInput {
        stdin: input.to_string(),
        file_assets: global_assets.clone(),
    }
}

/// Deprecated compatibility shim: an input of the form
/// `"<filename>:rest"` overrides that file's content.
///
/// Only filenames already declared in the question-level assets are
/// recognized, which bounds the inherent ambiguity of the convention
/// (any legitimate input could start with `name:`). New test data
/// should declare per-test `file_assets` instead.
fn parse_inline_override(input: &str, global_assets: &FileAssets) -> Option<(String, String)> {
    for filename in global_assets.keys() {
        if let Some(rest) = input.strip_prefix(filename.as_str()) {
            if let Some(content) = rest.strip_prefix(':') {
                return Some((filename.clone(), content.to_string()));
            }
        }
    }
    None
}
