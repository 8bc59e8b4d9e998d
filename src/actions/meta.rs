//! Generated metadata files: `build:sitemap` and `build:browserconfig`.
//!
//! Both documents are written with [maud](https://maud.lambda.xyz/); every
//! element gets an explicit closing tag so the output is well-formed XML.

use super::{RunContext, StageError, StageOutcome, count, select, slot, write};
use crate::config::{BrowserconfigStage, SitemapOptions};
use crate::pattern::slash_path;
use crate::stages::StageId;
use maud::{Markup, PreEscaped, html};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

pub(super) async fn sitemap(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let stage = slot(&ctx.config.sitemap, StageId::Sitemap)?.clone();
    let build = ctx.build().to_path_buf();
    let pages: Vec<String> = select(&build, Some(&stage.files))
        .await?
        .iter()
        .map(|p| slash_path(p))
        .collect();
    let xml = render_sitemap(&pages, &stage.options);
    write(&build.join("sitemap.xml"), xml.into_string()).await?;
    Ok(StageOutcome::Completed(Some(format!(
        "{} listed",
        count(pages.len(), "page")
    ))))
}

pub(super) async fn browserconfig(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let stage = slot(&ctx.config.browserconfig, StageId::Browserconfig)?;
    let xml = render_browserconfig(stage);
    write(&ctx.build().join("browserconfig.xml"), xml.into_string()).await?;
    Ok(StageOutcome::Completed(None))
}

/// Public URL of a page: `index.html` maps to its directory.
fn page_url(site_url: &str, page: &str) -> String {
    let base = site_url.trim_end_matches('/');
    if page == "index.html" {
        return format!("{base}/");
    }
    match page.strip_suffix("/index.html") {
        Some(dir) => format!("{base}/{dir}/"),
        None => format!("{base}/{page}"),
    }
}

fn render_sitemap(pages: &[String], options: &SitemapOptions) -> Markup {
    html! {
        (PreEscaped(XML_DECLARATION))
        urlset xmlns=(SITEMAP_NS) {
            @for page in pages {
                url {
                    loc { (page_url(&options.site_url, page)) }
                    @if let Some(freq) = &options.changefreq {
                        changefreq { (freq) }
                    }
                    @if let Some(weight) = options.priority {
                        priority { (format!("{weight:.1}")) }
                    }
                }
            }
        }
    }
}

fn render_browserconfig(tiles: &BrowserconfigStage) -> Markup {
    html! {
        (PreEscaped(XML_DECLARATION))
        browserconfig {
            msapplication {
                tile {
                    square70x70logo src=(tiles.tile70x70) {}
                    square150x150logo src=(tiles.tile150x150) {}
                    wide310x150logo src=(tiles.tile310x150) {}
                    square310x310logo src=(tiles.tile310x310) {}
                    TileColor { (tiles.tile_color) }
                }
            }
        }
    }
}
