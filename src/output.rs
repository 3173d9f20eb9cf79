use console::Style;
use serde::Serialize;

use crate::mutants::MutationDetails;
use crate::transform::InstrumentedUnit;
use crate::unit::UnitName;

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

pub fn print_success(msg: &str) {
    let style = Style::new().green().bold();
    println!("{} {}", style.apply_to("✓"), msg);
}

/// JSON shape of one unit in `plan` output.
#[derive(Debug, Serialize)]
pub struct UnitPlan<'a> {
    pub unit: &'a UnitName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub mutations: &'a [MutationDetails],
}

pub fn print_instrumented(unit: &UnitName, instrumented: &InstrumentedUnit, original_len: usize) {
    let style = Style::new().green().bold();
    let dim = Style::new().dim();
    println!(
        "{} {}: {} probes inserted {}",
        style.apply_to("✓"),
        unit,
        instrumented.probes.len(),
        dim.apply_to(format!("({} -> {} bytes)", original_len, instrumented.bytes.len())),
    );
}

pub fn print_unit_plan(unit: &UnitName, mutations: &[MutationDetails]) {
    let covered = mutations.iter().filter(|m| m.is_covered()).count();

    if mutations.is_empty() {
        let style = Style::new().green().bold();
        println!("{} {}: no mutations found", style.apply_to("✓"), unit);
        return;
    }

    let header = if covered == mutations.len() {
        Style::new().green().bold()
    } else {
        Style::new().yellow().bold()
    };
    println!(
        "{} {}: {} mutations, {} covered",
        header.apply_to(if covered == mutations.len() { "✓" } else { "!" }),
        unit,
        mutations.len(),
        covered,
    );

    let loc_style = Style::new().dim();
    let op_style = Style::new().magenta();
    let test_style = Style::new().cyan();
    for m in mutations {
        println!(
            "  {}:{} {} {}",
            m.filename(),
            m.line(),
            loc_style.apply_to(format!("[{}]", m.id().operator)),
            op_style.apply_to(m.description()),
        );
        if m.is_covered() {
            for test in m.tests_in_order() {
                println!(
                    "    {} {}",
                    test_style.apply_to(&test.name),
                    loc_style.apply_to(format!("{}ms", test.time)),
                );
            }
        } else {
            println!("    {}", loc_style.apply_to("not covered"));
        }
    }
}
