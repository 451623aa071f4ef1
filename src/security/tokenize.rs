//! Quote-aware command tokenizer
//!
//! Splits a command line into arguments the way a user typing into the lab
//! terminal expects, without ever handing the string to a shell:
//!
//! - unquoted whitespace separates arguments
//! - `'...'` and `"..."` group text (quotes are removed, spaces kept)
//! - a backslash-escaped quote (`\"`, `\'`) is kept as a literal quote
//! - an unterminated quote runs to the end of the input
//!
//! No variable expansion, globbing, or operator handling happens here; `|`,
//! `;` and friends are ordinary characters and end up inside arguments.

/// Tokenize `input` into an argument vector.
///
/// ```
/// use labgate::security::tokenize;
///
/// assert_eq!(tokenize(r#"sh -c "echo a b""#), vec!["sh", "-c", "echo a b"]);
/// ```
pub fn tokenize(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    // Distinguishes `""` (an empty argument) from no argument at all.
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' && chars.peek() == Some(&q) {
                    current.push(q);
                    chars.next();
                } else if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => {
                if c == '\\' && matches!(chars.peek(), Some('"') | Some('\'')) {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                    in_token = true;
                } else if c == '"' || c == '\'' {
                    quote = Some(c);
                    in_token = true;
                } else if c.is_whitespace() {
                    if in_token {
                        args.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                } else {
                    current.push(c);
                    in_token = true;
                }
            }
        }
    }

    if in_token {
        args.push(current);
    }

    args
}
