use std::future::Future;

use crate::models::Submission;

/// The site a piece of work runs under. Delivery jobs switch into the
/// submission's site so templates and language resolve the same way they
/// did at submit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteContext {
    pub handle: String,
    pub language: String,
}

impl SiteContext {
    pub fn for_submission(submission: &Submission) -> Self {
        Self {
            handle: submission.site_handle.clone(),
            language: submission.language.clone(),
        }
    }
}

tokio::task_local! {
    static CURRENT_SITE: SiteContext;
}

pub fn current() -> Option<SiteContext> {
    CURRENT_SITE.try_with(|site| site.clone()).ok()
}

/// Run `f` with `site` as the current site. The previous site (if any) is
/// restored when `f` completes, whether it succeeded or not.
pub async fn scope<F: Future>(site: SiteContext, f: F) -> F::Output {
    CURRENT_SITE.scope(site, f).await
}
