use crate::ast::{Node, Origin, Path};
use crate::error::{Error, Location};
use crate::expr::parse_chain;
use crate::lexer::{segments, Segment};

const MAX_BLOCK_DEPTH: usize = 128;

enum BlockKind {
    Section { path: Path, negated: bool },
    PartialDecl { name: String },
    Raw,
    /// Any block opened inside a raw block; only tracked for balancing.
    Skipped,
}

struct Open {
    kind: BlockKind,
    /// Tag text after the marker, matched against named closers.
    label: String,
    location: Location,
    /// Offset just past the opening tag.
    body_start: usize,
    children: Vec<Node>,
}

pub fn parse(source: &str) -> Result<Vec<Node>, Error> {
    let mut root = Vec::new();
    let mut stack: Vec<Open> = Vec::new();

    for segment in segments(source) {
        let (inner, start, end) = match segment {
            Segment::Literal(text) => {
                if !in_raw(&stack) {
                    push(&mut root, &mut stack, Node::Text(text.to_string()));
                }
                continue;
            }
            Segment::Tag { inner, start, end } => (inner, start, end),
        };

        let tag = inner.trim();
        let location = Location::in_source(source, start);
        let malformed = |reason: &str| Error::MalformedTag {
            tag: tag.to_string(),
            reason: reason.to_string(),
            location,
        };
        let raw = in_raw(&stack);
        let mut chars = tag.chars();
        let marker = chars.next();
        let rest = chars.as_str().trim();

        let opened = |kind: BlockKind| Open {
            kind,
            label: rest.to_string(),
            location,
            body_start: end,
            children: Vec::new(),
        };

        let opens_block = matches!(marker, Some('$' | ':' | '#' | '!' | '+'));
        if opens_block && stack.len() >= MAX_BLOCK_DEPTH {
            return Err(malformed("blocks nest too deeply"));
        }

        match marker {
            Some('/') => {
                let Some(open) = stack.pop() else {
                    return Err(Error::UnexpectedClose {
                        name: rest.to_string(),
                        location,
                    });
                };
                if !rest.is_empty() && rest != open.label {
                    return Err(Error::MismatchedClose {
                        expected: open.label,
                        found: rest.to_string(),
                        location,
                        opened: open.location,
                    });
                }
                let node = match open.kind {
                    BlockKind::Section { path, negated } => Some(Node::Section {
                        path,
                        negated,
                        children: open.children,
                    }),
                    BlockKind::PartialDecl { name } => Some(Node::PartialDecl {
                        name,
                        children: open.children,
                    }),
                    BlockKind::Raw if !in_raw(&stack) => {
                        Some(Node::Raw(source[open.body_start..start].to_string()))
                    }
                    BlockKind::Raw | BlockKind::Skipped => None,
                };
                if let Some(node) = node {
                    push(&mut root, &mut stack, node);
                }
            }
            Some('$') => stack.push(opened(BlockKind::Raw)),
            Some(':' | '#' | '!' | '+') if raw => stack.push(opened(BlockKind::Skipped)),
            Some(m @ (':' | '#' | '!')) => {
                let (path, _) = parse_path(rest, false).map_err(|r| malformed(&r))?;
                stack.push(opened(BlockKind::Section {
                    path,
                    negated: m == '!',
                }));
            }
            Some('+') => {
                if rest.is_empty() {
                    return Err(malformed("partial declaration needs a name"));
                }
                stack.push(opened(BlockKind::PartialDecl {
                    name: rest.to_string(),
                }));
            }
            _ if raw => {}
            Some('>') => {
                if rest.is_empty() {
                    return Err(malformed("partial reference needs a name"));
                }
                push(&mut root, &mut stack, Node::Partial(rest.to_string()));
            }
            _ => {
                let (path, encode) = parse_path(tag, true).map_err(|r| malformed(&r))?;
                push(&mut root, &mut stack, Node::Var { path, encode });
            }
        }
    }

    match stack.pop() {
        Some(open) => Err(Error::Unclosed {
            name: open.label,
            location: open.location,
        }),
        None => Ok(root),
    }
}

fn in_raw(stack: &[Open]) -> bool {
    stack.iter().any(|o| matches!(o.kind, BlockKind::Raw))
}

fn push(root: &mut Vec<Node>, stack: &mut [Open], node: Node) {
    match stack.last_mut() {
        Some(open) => open.children.push(node),
        None => root.push(node),
    }
}

/// Parse `[%] -* [*~@] name tail`. Returns the path and whether `%` was present.
fn parse_path(text: &str, allow_encode: bool) -> Result<(Path, bool), String> {
    let mut s = text;
    let mut encode = false;
    if allow_encode {
        if let Some(rest) = s.strip_prefix('%') {
            encode = true;
            s = rest.trim_start();
        }
    }

    let backtrack = s.len() - s.trim_start_matches('-').len();
    s = &s[backtrack..];

    let origin = match s.chars().next() {
        Some('*') => Origin::Global,
        Some('~') => Origin::Helper,
        Some('@') => Origin::Iteration,
        _ => Origin::Scope,
    };
    if origin != Origin::Scope {
        s = &s[1..];
        if backtrack > 0 && matches!(origin, Origin::Global | Origin::Helper) {
            return Err("backtracking does not apply to global or helper references".to_string());
        }
    }

    let len = s
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(s.len());
    if len == 0 {
        return Err("expected a name".to_string());
    }

    let tail = s[len..].trim();
    let path = Path {
        backtrack,
        chain: if tail.is_empty() {
            Vec::new()
        } else {
            parse_chain(tail)
        },
        ..Path::new(&s[..len], origin)
    };
    Ok((path, encode))
}
