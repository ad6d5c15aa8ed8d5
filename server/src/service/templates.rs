//! Bundled starter templates
//!
//! Used as a fallback project when repository synchronization fails.

use std::collections::HashMap;

use serde::Serialize;
use tracing::error;

use crate::domain::file_tree::FileTree;
use crate::domain::repository::TemplateId;

/// A bundled starter project
#[derive(Debug, Clone)]
pub struct Template {
    pub id: TemplateId,
    pub name: &'static str,
    pub files: FileTree,
    pub default_port: u16,
}

/// Template listing entry
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub id: TemplateId,
    pub name: &'static str,
    pub default_port: u16,
    pub file_count: usize,
}

const NEXT_PACKAGE_JSON: &str = r#"{
  "name": "nextjs-starter",
  "private": true,
  "scripts": {
    "dev": "next dev",
    "build": "next build",
    "start": "next start"
  },
  "dependencies": {
    "next": "14.2.5",
    "react": "18.3.1",
    "react-dom": "18.3.1"
  }
}
"#;

const NEXT_PAGE: &str = r#"export default function Home() {
  return (
    <main style={{ fontFamily: "sans-serif", padding: 32 }}>
      <h1>Next.js starter</h1>
      <p>Edit app/page.js and save to reload.</p>
    </main>
  );
}
"#;

const NEXT_LAYOUT: &str = r#"export const metadata = { title: "Next.js starter" };

export default function RootLayout({ children }) {
  return (
    <html lang="en">
      <body>{children}</body>
    </html>
  );
}
"#;

const VITE_PACKAGE_JSON: &str = r#"{
  "name": "vite-react-starter",
  "private": true,
  "type": "module",
  "scripts": {
    "dev": "vite",
    "build": "vite build",
    "preview": "vite preview"
  },
  "dependencies": {
    "react": "18.3.1",
    "react-dom": "18.3.1"
  },
  "devDependencies": {
    "@vitejs/plugin-react": "4.3.1",
    "vite": "5.3.4"
  }
}
"#;

const VITE_CONFIG: &str = r#"import { defineConfig } from "vite";
import react from "@vitejs/plugin-react";

export default defineConfig({
  plugins: [react()],
  server: { host: true, port: Number(process.env.PORT) || 5173 },
});
"#;

const VITE_INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <title>Vite + React starter</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.jsx"></script>
  </body>
</html>
"#;

const VITE_MAIN: &str = r#"import React from "react";
import { createRoot } from "react-dom/client";
import App from "./App.jsx";

createRoot(document.getElementById("root")).render(<App />);
"#;

const REACT_APP: &str = r#"export default function App() {
  return (
    <main style={{ fontFamily: "sans-serif", padding: 32 }}>
      <h1>React starter</h1>
      <p>Edit src/App and save to reload.</p>
    </main>
  );
}
"#;

const CRA_PACKAGE_JSON: &str = r#"{
  "name": "cra-starter",
  "private": true,
  "scripts": {
    "start": "react-scripts start",
    "build": "react-scripts build"
  },
  "dependencies": {
    "react": "18.3.1",
    "react-dom": "18.3.1",
    "react-scripts": "5.0.1"
  },
  "browserslist": ["last 1 chrome version"]
}
"#;

const CRA_INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <title>React starter</title>
  </head>
  <body>
    <div id="root"></div>
  </body>
</html>
"#;

const CRA_INDEX: &str = r#"import React from "react";
import { createRoot } from "react-dom/client";
import App from "./App";

createRoot(document.getElementById("root")).render(<App />);
"#;

/// Registry of bundled templates keyed by id
pub struct TemplateRegistry {
    templates: HashMap<TemplateId, Template>,
}

impl TemplateRegistry {
    /// Create an empty registry
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Create a registry with the bundled starters
    pub fn bundled() -> Self {
        let mut registry = Self::empty();
        registry.add(
            TemplateId::NEXTJS_STARTER,
            "Next.js",
            3000,
            &[
                ("package.json", NEXT_PACKAGE_JSON),
                ("app/layout.js", NEXT_LAYOUT),
                ("app/page.js", NEXT_PAGE),
            ],
        );
        registry.add(
            TemplateId::VITE_REACT_STARTER,
            "Vite + React",
            5173,
            &[
                ("package.json", VITE_PACKAGE_JSON),
                ("vite.config.js", VITE_CONFIG),
                ("index.html", VITE_INDEX_HTML),
                ("src/main.jsx", VITE_MAIN),
                ("src/App.jsx", REACT_APP),
            ],
        );
        registry.add(
            TemplateId::CRA_STARTER,
            "Create React App",
            3000,
            &[
                ("package.json", CRA_PACKAGE_JSON),
                ("public/index.html", CRA_INDEX_HTML),
                ("src/index.js", CRA_INDEX),
                ("src/App.js", REACT_APP),
            ],
        );
        registry
    }

    fn add(&mut self, id: &str, name: &'static str, default_port: u16, files: &[(&str, &str)]) {
        match FileTree::from_files(files.iter().copied()) {
            Ok(files) => self.insert(Template {
                id: TemplateId::from(id),
                name,
                files,
                default_port,
            }),
            Err(e) => error!("Bundled template {} is invalid: {}", id, e),
        }
    }

    /// Register a template, replacing any with the same id
    pub fn insert(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }

    /// Look up a template by id
    pub fn get(&self, id: &TemplateId) -> Option<&Template> {
        self.templates.get(id)
    }

    /// Summaries of all templates, sorted by id
    pub fn list(&self) -> Vec<TemplateSummary> {
        let mut out: Vec<TemplateSummary> = self
            .templates
            .values()
            .map(|t| TemplateSummary {
                id: t.id.clone(),
                name: t.name,
                default_port: t.default_port,
                file_count: t.files.file_count(),
            })
            .collect();
        out.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        out
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::bundled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::package::{detect_package_manager, parse_manifest, PackageManagerKind};
    use crate::domain::types::FrameworkKind;
    use crate::service::inference::infer_dev_command;

    #[test]
    fn bundled_templates_are_registered() {
        let registry = TemplateRegistry::bundled();
        let ids: Vec<String> = registry.list().into_iter().map(|t| t.id.to_string()).collect();
        assert_eq!(ids, vec!["cra-starter", "nextjs-starter", "vite-react-starter"]);
    }

    #[test]
    fn unknown_template_is_none() {
        let registry = TemplateRegistry::bundled();
        assert!(registry.get(&TemplateId::from("svelte-starter")).is_none());
    }

    #[test]
    fn every_template_infers_its_own_framework() {
        let registry = TemplateRegistry::bundled();
        let cases = [
            (TemplateId::NEXTJS_STARTER, FrameworkKind::Next),
            (TemplateId::VITE_REACT_STARTER, FrameworkKind::Vite),
            (TemplateId::CRA_STARTER, FrameworkKind::CreateReactApp),
        ];
        for (id, framework) in cases {
            let template = registry.get(&TemplateId::from(id)).unwrap();
            let manifest = parse_manifest(&template.files).expect("template manifest parses");
            let pm = detect_package_manager(&template.files);
            assert_eq!(pm, PackageManagerKind::Npm);
            let command = infer_dev_command(Some(&manifest), pm, None).unwrap();
            assert_eq!(command.framework, framework);
            assert_eq!(command.port, template.default_port);
        }
    }
}
