//! Identifier allocation for emitted WGSL.

use std::collections::HashSet;

use spindle_ir::MathFunction;

/// Keywords, reserved words and builtins an identifier must not shadow.
const RESERVED: &[&str] = &[
    // keywords
    "alias", "break", "case", "const", "const_assert", "continue", "continuing", "default",
    "diagnostic", "discard", "else", "enable", "false", "fn", "for", "if", "let", "loop",
    "override", "requires", "return", "struct", "switch", "true", "var", "while",
    // types
    "array", "atomic", "bool", "f16", "f32", "i32", "u32", "mat2x2", "mat2x3", "mat2x4",
    "mat3x2", "mat3x3", "mat3x4", "mat4x2", "mat4x3", "mat4x4", "ptr", "sampler",
    "sampler_comparison", "vec2", "vec3", "vec4",
    // reserved
    "asm", "async", "await", "become", "break", "cast", "catch", "class", "crate", "do",
    "dynamic", "enum", "export", "extends", "extern", "final", "finally", "friend", "from",
    "goto", "impl", "import", "in", "macro", "match", "mod", "module", "move", "mut",
    "namespace", "new", "null", "package", "private", "protected", "pub", "public", "self",
    "static", "super", "target", "this", "throw", "trait", "try", "type", "typedef",
    "typeof", "union", "unsafe", "use", "using", "virtual", "where", "with", "yield",
    // builtin functions used by the writer
    "arrayLength", "bitcast", "select",
];

/// Hands out unique, valid WGSL identifiers.
#[derive(Clone, Debug, Default)]
pub(crate) struct Namer {
    taken: HashSet<String>,
}

impl Namer {
    pub fn new() -> Self {
        let mut taken: HashSet<String> = RESERVED.iter().map(|s| s.to_string()).collect();
        taken.extend(MathFunction::ALL.iter().map(|f| f.name().to_string()));
        Self { taken }
    }

    /// Claims `name`, exactly as given. Returns `false` if it was taken.
    pub fn reserve(&mut self, name: &str) -> bool {
        self.taken.insert(name.to_string())
    }

    /// Returns a fresh identifier derived from `base`.
    pub fn call(&mut self, base: &str) -> String {
        let base = sanitize(base);
        if self.taken.insert(base.clone()) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}_{n}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    // `__` prefixes are reserved and `_` alone is not an identifier.
    while out.starts_with("__") {
        out.remove(0);
    }
    if out.is_empty() || out == "_" || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 'v');
    }
    out
}
