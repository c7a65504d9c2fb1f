//! Generated modules.
//!
//! The build writes three kinds of source files for the JavaScript side:
//!
//! - a hydration entrypoint per page, which the bundler compiles
//! - one client registry mapping module keys to deferred loaders
//! - one server render worker executed by the render runtime
//!
//! All output is deterministic for identical inputs so repeated builds
//! produce identical files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::compose::RenderNode;
use crate::discovery::{module_key, PageComponent};

const HEADER: &str = "// Generated by schorle. Do not edit.\n";

/// Hydration entrypoint for one composed page tree.
///
/// Imports the page and its layouts in the tree's root-first order and
/// hands them to the client hydrator's mount routine.
pub fn hydration_entry(tree: &RenderNode, hydrator_module: &str) -> String {
    let layouts = tree.layout_paths();
    let mut out = String::from(HEADER);

    out.push_str(&format!("import {{ hydratePage }} from {};\n", js_string(hydrator_module)));
    out.push_str(&format!("import Page from {};\n", js_path(tree.page_path())));
    for (index, layout) in layouts.iter().enumerate() {
        out.push_str(&format!("import Layout{index} from {};\n", js_path(layout)));
    }

    let names: Vec<String> = (0..layouts.len()).map(|i| format!("Layout{i}")).collect();
    out.push_str(&format!(
        "\nhydratePage({{ page: Page, layouts: [{}] }});\n",
        names.join(", ")
    ));
    out
}

/// Client registry: every page identity and every module key, mapped to a
/// deferred loader, so the hydrator resolves modules without scanning.
pub fn registry_module(
    pages_root: &Path,
    pages: &[(PageComponent, Vec<PathBuf>)],
) -> String {
    let mut modules: BTreeMap<String, &Path> = BTreeMap::new();
    let mut identities: BTreeMap<&str, String> = BTreeMap::new();

    for (page, layouts) in pages {
        let key = module_key(pages_root, &page.module_path);
        modules.insert(key.clone(), &page.module_path);
        identities.insert(&page.identity, key);
        for layout in layouts {
            modules.insert(module_key(pages_root, layout), layout);
        }
    }

    let mut out = String::from(HEADER);
    out.push_str("export const modules: Record<string, () => Promise<any>> = {\n");
    for (key, path) in &modules {
        out.push_str(&format!("  {}: () => import({}),\n", js_string(key), js_path(path)));
    }
    out.push_str("};\n\n");

    out.push_str("export const pages: Record<string, string> = {\n");
    for (identity, key) in &identities {
        out.push_str(&format!("  {}: {},\n", js_string(identity), js_string(key)));
    }
    out.push_str("};\n");
    out
}

/// Server render worker.
///
/// Reads one JSON render request on stdin (`{ tree, props, bootstrapScript }`),
/// imports the modules named in the tree, composes them root-first and
/// streams the markup to stdout.
pub fn render_worker_module() -> String {
    let mut out = String::from(HEADER);
    out.push_str(
        r#"import { createElement, type ReactNode } from "react";
import { renderToReadableStream } from "react-dom/server";

type RenderNode =
  | { kind: "layout"; module: string; child: RenderNode }
  | { kind: "page"; identity: string; module: string };

type RenderRequest = {
  tree: RenderNode;
  props: Record<string, unknown> | null;
  bootstrapScript: string;
};

async function materialize(node: RenderNode, props: RenderRequest["props"]): Promise<ReactNode> {
  const mod = await import(node.module);
  if (node.kind === "page") {
    return createElement(mod.default, props ?? {});
  }
  return createElement(mod.default, null, await materialize(node.child, props));
}

const request: RenderRequest = JSON.parse(await Bun.stdin.text());
const element = await materialize(request.tree, request.props);
const stream = await renderToReadableStream(element, {
  bootstrapModules: [request.bootstrapScript],
});

const writer = Bun.stdout.writer();
for await (const chunk of stream) {
  writer.write(chunk);
  await writer.flush();
}
await writer.end();
"#,
    );
    out
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn js_path(path: &Path) -> String {
    js_string(&path.to_string_lossy())
}
