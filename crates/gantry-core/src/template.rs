//! `{name}` placeholder rendering for service command templates.
//!
//! `{{` and `}}` produce literal braces. Every placeholder must be present in
//! the variable bag; a typo in a declared command is reported instead of being
//! passed to supervisord verbatim.

use std::collections::BTreeMap;

pub type Vars = BTreeMap<&'static str, String>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
	#[error("unknown template variable '{name}' in '{template}'")]
	UnknownVariable { name: String, template: String },

	#[error("unclosed '{{' at offset {offset} in '{template}'")]
	Unclosed { offset: usize, template: String },

	#[error("unmatched '}}' at offset {offset} in '{template}'")]
	Unmatched { offset: usize, template: String },
}

pub fn render(template: &str, vars: &Vars) -> Result<String, TemplateError> {
	let mut out = String::with_capacity(template.len());
	let mut chars = template.char_indices().peekable();

	while let Some((offset, c)) = chars.next() {
		match c {
			'{' => {
				if matches!(chars.peek(), Some((_, '{'))) {
					chars.next();
					out.push('{');
					continue;
				}
				let mut name = String::new();
				let mut closed = false;
				for (_, c) in chars.by_ref() {
					if c == '}' {
						closed = true;
						break;
					}
					name.push(c);
				}
				if !closed {
					return Err(TemplateError::Unclosed {
						offset,
						template: template.to_string(),
					});
				}
				match vars.get(name.trim()) {
					Some(value) => out.push_str(value),
					None => {
						return Err(TemplateError::UnknownVariable {
							name,
							template: template.to_string(),
						})
					}
				}
			}
			'}' => {
				if matches!(chars.peek(), Some((_, '}'))) {
					chars.next();
					out.push('}');
				} else {
					return Err(TemplateError::Unmatched {
						offset,
						template: template.to_string(),
					});
				}
			}
			c => out.push(c),
		}
	}

	Ok(out)
}
