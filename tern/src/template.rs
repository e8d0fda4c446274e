//! Load-time rendering of migration bodies.
//!
//! Shared fragments and migration bodies live in one template namespace so that a body
//! can `{% include %}` a fragment by its relative path. The environment starts empty and
//! only a fixed set of helpers is registered:
//!
//! | helper | kind |
//! |--------|------|
//! | `upper`, `lower`, `trim`, `replace`, `default`, `join` | filters |
//! | `quote_ident` | filter, quotes an SQL identifier (`"my ""table"""`) |
//! | `quote_literal` | filter, quotes an SQL string literal (`'it''s'`) |
//!
//! Referencing an undefined variable is an error.

use crate::core::Data;
use crate::error::Error;
use minijinja::{filters, Environment, UndefinedBehavior};

/// A set of compiled templates sharing one namespace.
pub struct TemplateSet {
    env: Environment<'static>,
}

impl TemplateSet {
    pub fn new() -> Self {
        let mut env = Environment::empty();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("upper", filters::upper);
        env.add_filter("lower", filters::lower);
        env.add_filter("trim", filters::trim);
        env.add_filter("replace", filters::replace);
        env.add_filter("default", filters::default);
        env.add_filter("join", filters::join);
        env.add_filter("quote_ident", quote_ident);
        env.add_filter("quote_literal", quote_literal);
        Self { env }
    }

    /// Compiles `source` under `name`. Fails with [Error::TemplateParse] on malformed syntax.
    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) -> Result<(), Error> {
        let name = name.into();
        self.env
            .add_template_owned(name.clone(), source.into())
            .map_err(|source| Error::TemplateParse { name, source })
    }

    /// Renders the template `name` against `data`.
    pub fn render(&self, name: &str, data: &Data) -> Result<String, Error> {
        self.env
            .get_template(name)
            .and_then(|template| template.render(data))
            .map_err(|source| Error::TemplateRender {
                name: name.to_string(),
                source,
            })
    }
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateSet").finish_non_exhaustive()
    }
}

/// True if `sql` has at least one line that is neither blank nor a `--` comment.
pub fn contains_sql(sql: &str) -> bool {
    sql.lines().map(str::trim).any(|line| !line.is_empty() && !line.starts_with("--"))
}

fn quote_ident(value: String) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn quote_literal(value: String) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
