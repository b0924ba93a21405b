use std::path::Path;

use {
    anyhow::{Context, Result},
    homegw_config::load_processors,
    homegw_protocol::ProcessorSpec,
};

/// Print the processors defined under `path`, enabled ones only unless
/// `all` is set.
pub fn list(path: &Path, all: bool) -> Result<()> {
    let specs = load_processors(path)
        .with_context(|| format!("failed to load processors from {}", path.display()))?;
    let shown: Vec<&ProcessorSpec> = specs.iter().filter(|p| all || p.enabled).collect();

    if shown.is_empty() {
        println!("No processors found in {}.", path.display());
        return Ok(());
    }
    print!("{}", render_table(&shown));
    println!(
        "\n{} shown, {} enabled of {} defined",
        shown.len(),
        specs.iter().filter(|p| p.enabled).count(),
        specs.len()
    );
    Ok(())
}

fn parameter_summary(spec: &ProcessorSpec) -> String {
    if spec.parameters.is_empty() {
        return "-".into();
    }
    spec.parameters
        .iter()
        .map(|p| {
            let marker = if p.required {
                "*"
            } else {
                ""
            };
            format!("{}{marker}:{}", p.name, p.kind.as_str())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_table(specs: &[&ProcessorSpec]) -> String {
    let rows: Vec<[String; 4]> = specs
        .iter()
        .map(|p| {
            let id = if p.enabled {
                p.id.clone()
            } else {
                format!("{} (disabled)", p.id)
            };
            [id, p.name.clone(), p.group.clone(), parameter_summary(p)]
        })
        .collect();
    let header = ["ID", "NAME", "GROUP", "PARAMETERS"];

    let mut widths = header.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: [&str; 4]| {
        let line = format!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {}",
            cells[0],
            cells[1],
            cells[2],
            cells[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
        );
        out.push_str(line.trim_end());
        out.push('\n');
    };
    push_row(header);
    for row in &rows {
        push_row([&row[0], &row[1], &row[2], &row[3]]);
    }
    out
}
