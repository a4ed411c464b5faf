//! 目录列表的 HTML 渲染。

use html_escape::encode_text;
use std::fmt::Write as _;

use crate::storage::DirEntry;

/// 渲染目录列表。`relative_dir` 为相对服务目录的路径，空串表示服务目录本身。
///
/// 非服务目录时，首项为指向上级目录的 `../` 链接。
pub fn render_listing(relative_dir: &str, entries: &[DirEntry]) -> String {
    let relative_dir = relative_dir.trim_matches('/');
    let shown = format!("/{relative_dir}");
    let title = encode_text(&shown);
    let mut html = String::with_capacity(256 + entries.len() * 64);
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Index of {title}</title></head>\n<body>\n<h1>Index of {title}</h1>\n<ul>\n"
    );

    if !relative_dir.is_empty() {
        let parent = match relative_dir.rsplit_once('/') {
            Some((parent, _)) => format!("/{}/", encode_path(parent)),
            None => "/".to_string(),
        };
        let _ = writeln!(html, "<li><a href=\"{parent}\">../</a></li>");
    }

    for entry in entries {
        let suffix = if entry.is_dir { "/" } else { "" };
        let _ = writeln!(
            html,
            "<li><a href=\"/{}{suffix}\">{}{suffix}</a></li>",
            encode_path(&entry.path),
            encode_text(&entry.name)
        );
    }

    html.push_str("</ul>\n</body></html>\n");
    html
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
