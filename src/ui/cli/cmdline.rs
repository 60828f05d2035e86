//! Command line building for launched processes.
//!
//! Arguments are quoted so the target's command-line parser splits them back
//! into the original strings.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandLineError {
    #[error("module name must not contain a double quote: {0}")]
    QuotedModuleName(String),

    #[error("command line must start with a module name")]
    MissingModuleName,
}

/// Quote `module` followed by `args`.
///
/// The module name is quoted verbatim, so it may not contain `"` itself.
pub fn build_with_module<I, S>(module: &str, args: I) -> Result<String, CommandLineError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    if module.contains('"') {
        return Err(CommandLineError::QuotedModuleName(module.to_string()));
    }

    let mut line = format!("\"{}\"", module);
    let rest = build(args);
    if !rest.is_empty() {
        line.push(' ');
        line.push_str(&rest);
    }
    Ok(line)
}

/// Quote every argument and join them with single spaces.
pub fn build<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|arg| quote(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wrap in quotes. Backslashes before a quote or before the closing quote are
/// doubled, then quotes are escaped.
fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    let mut backslashes = 0usize;

    quoted.push('"');
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                push_backslashes(&mut quoted, backslashes * 2 + 1);
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                push_backslashes(&mut quoted, backslashes);
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    push_backslashes(&mut quoted, backslashes * 2);
    quoted.push('"');

    quoted
}

fn push_backslashes(s: &mut String, count: usize) {
    s.extend(std::iter::repeat('\\').take(count));
}
