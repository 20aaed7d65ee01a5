use std::sync::LazyLock;

use regex::Regex;

use crate::fields::coerce;
use crate::models::{Form, Integration, Submission};
use crate::site;

static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z0-9_]+)(?::([A-Za-z0-9_]+))?(?:\[([A-Za-z0-9_]+)\])?\}").unwrap()
});

pub struct TemplateContext<'a> {
    pub form: &'a Form,
    pub submission: &'a Submission,
    pub integration: Option<&'a Integration>,
}

/// Render `{variable}` references against the submission. Supports field
/// handles, `{group[inner]}`, and the `submission:`, `form:`, `site:` and
/// `integration:` namespaces. Unknown variables render as empty strings.
pub fn render(template: &str, ctx: &TemplateContext) -> String {
    VAR_RE
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            let attr = caps.get(2).map(|m| m.as_str());
            let nested = caps.get(3).map(|m| m.as_str());
            resolve(name, attr, nested, ctx).unwrap_or_default()
        })
        .into_owned()
}

fn resolve(name: &str, attr: Option<&str>, nested: Option<&str>, ctx: &TemplateContext) -> Option<String> {
    match (name, attr) {
        ("submission", Some(attr)) => submission_attr(ctx.submission, attr),
        ("form", Some(attr)) => match attr {
            "id" => Some(ctx.form.id.to_string()),
            "handle" => Some(ctx.form.handle.clone()),
            "title" => Some(ctx.form.title.clone()),
            _ => None,
        },
        ("site", Some(attr)) => {
            let site = site::current().unwrap_or_else(|| site::SiteContext::for_submission(ctx.submission));
            match attr {
                "handle" => Some(site.handle),
                "language" => Some(site.language),
                _ => None,
            }
        }
        ("integration", Some(attr)) => {
            let integration = ctx.integration?;
            match attr {
                "handle" => Some(integration.handle.clone()),
                "name" => Some(integration.name.clone()),
                _ => None,
            }
        }
        (_, Some(_)) => None,
        (handle, None) => field_value(handle, nested, ctx),
    }
}

fn submission_attr(submission: &Submission, attr: &str) -> Option<String> {
    match attr {
        "id" => Some(submission.id.to_string()),
        "status" => Some(submission.status.clone()),
        "language" => Some(submission.language.clone()),
        "site" => Some(submission.site_handle.clone()),
        "dateCreated" | "created_at" => Some(submission.created_at.to_rfc3339()),
        _ => None,
    }
}

fn field_value(handle: &str, nested: Option<&str>, ctx: &TemplateContext) -> Option<String> {
    let raw = ctx.submission.value(handle)?;

    let Some(field) = ctx.form.field(handle) else {
        return coerce::scalar_string(raw);
    };

    match nested {
        None => Some(field.value_as_string(raw)),
        Some(inner) => {
            let sub = field.nested(inner)?;
            Some(sub.value_as_string(raw.get(inner)?))
        }
    }
}
