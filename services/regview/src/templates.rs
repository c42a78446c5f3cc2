//! HTML pages.

use chrono::{DateTime, SecondsFormat, Utc};
use maud::{DOCTYPE, Markup, html};

use crate::filler::{BaseData, IndexData, RepositoryData};

/// The stylesheet, served at `static/style.css`.
pub const STYLE: &str = include_str!("../static/style.css");

/// Page listing every repository.
pub fn index(data: &IndexData) -> String {
    let base = &data.base;
    layout(
        base,
        &base.registry_name,
        html! {
            h1 { "Repositories" }
            @if data.repositories.is_empty() {
                p.muted { "No repositories yet." }
            } @else {
                table {
                    thead {
                        tr { th { "Repository" } th { "Pull" } th { "Last updated" } }
                    }
                    tbody {
                        @for repository in &data.repositories {
                            tr {
                                td {
                                    a href={ (base.absolute_dir) "repo/" (repository.repository_name) "/" } {
                                        (repository.repository_name)
                                    }
                                }
                                td { (pull(&repository.pull_reference)) }
                                td { (timestamp(repository.last_updated_at)) }
                            }
                        }
                    }
                }
            }
        },
    )
    .into_string()
}

/// Page listing the tags of one repository.
pub fn repository(data: &RepositoryData) -> String {
    let title = format!("{} - {}", data.repository_name, data.base.registry_name);
    layout(
        &data.base,
        &title,
        html! {
            h1 { (data.repository_name) }
            p { "Latest: " (pull(&data.pull_reference)) }
            h2 { "Tags" }
            table {
                thead {
                    tr { th { "Tag" } th { "Pull" } th { "Created" } }
                }
                tbody {
                    @for tag in &data.tags {
                        tr {
                            td { (tag.tag) }
                            td { (pull(&tag.pull_reference)) }
                            td { (timestamp(tag.created_at)) }
                        }
                    }
                }
            }
        },
    )
    .into_string()
}

/// 404 page.
pub fn not_found(base: &BaseData) -> String {
    error_page(base, "Not found", "There is nothing here.")
}

/// 500 page.
pub fn internal_error(base: &BaseData) -> String {
    error_page(
        base,
        "Something went wrong",
        "The registry could not be read. Try again in a little while.",
    )
}

fn error_page(base: &BaseData, title: &str, message: &str) -> String {
    layout(
        base,
        title,
        html! {
            div.error {
                h1 { (title) }
                p { (message) }
                p { a href=(base.absolute_dir) { "Back to all repositories" } }
            }
        },
    )
    .into_string()
}

fn layout(base: &BaseData, title: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) }
                link rel="stylesheet" href={ (base.absolute_dir) "static/style.css" };
            }
            body {
                header {
                    p { a href=(base.absolute_dir) { strong { (base.registry_name) } } }
                }
                main { (content) }
                footer {
                    "Rendered " (base.last_updated)
                    @if let Some(synchronized_at) = base.synchronized_at {
                        " from a registry snapshot taken " (rfc3339(synchronized_at))
                    }
                }
            }
        }
    }
}

fn pull(reference: &str) -> Markup {
    html! {
        code { (reference) }
        button.copy type="button" data-reference=(reference)
            onclick="navigator.clipboard.writeText(this.dataset.reference)" { "Copy" }
    }
}

fn timestamp(at: Option<DateTime<Utc>>) -> Markup {
    match at {
        Some(at) => html! { time datetime=(rfc3339(at)) { (at.format("%Y-%m-%d %H:%M UTC")) } },
        None => html! { span.muted { "unknown" } },
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
