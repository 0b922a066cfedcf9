//! CC dependency graph and interview order.
//!
//! One vertex per CC, one edge per declared requirement that is itself part
//! of the set. Order is a depth-first topological sort; a cycle yields no
//! order at all. Deferral on the root endpoint splits the sorted order, so
//! it never breaks a requirement.

use std::collections::{BTreeSet, HashMap};

use zw_domain::{CcCatalog, CommandClass};

use super::error::StructuralError;

/// CCs the security bootstrap interviews before any graph runs.
pub const BOOTSTRAP_CCS: [CommandClass; 4] = [
    CommandClass::SECURITY,
    CommandClass::SECURITY_2,
    CommandClass::MANUFACTURER_SPECIFIC,
    CommandClass::VERSION,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CcPlan {
    /// Interview now, in this order.
    pub ordered: Vec<CommandClass>,
    /// Application CCs held back until every other endpoint is done.
    pub deferred: Vec<CommandClass>,
}

/// Plan the graph part of an endpoint's interview.
pub fn plan(
    catalog: &CcCatalog,
    endpoint: u8,
    supported: &[CommandClass],
    defer_application: bool,
) -> Result<CcPlan, StructuralError> {
    let mut candidates = Vec::new();
    for &cc in supported {
        if BOOTSTRAP_CCS.contains(&cc) {
            continue;
        }
        if !catalog.is_implemented(cc) {
            tracing::warn!(endpoint, cc = %cc, "no interview procedure for CC, skipping");
            continue;
        }
        candidates.push(cc);
    }

    let order = topological_order(catalog, &candidates)
        .map_err(|cycle| StructuralError::DependencyCycle { endpoint, cycle })?;
    if !defer_application {
        return Ok(CcPlan {
            ordered: order,
            deferred: Vec::new(),
        });
    }

    // Walk dependents before their requirements so an application CC that a
    // non-deferred CC needs is pulled forward with it.
    let members: BTreeSet<CommandClass> = order.iter().copied().collect();
    let mut needed_now = BTreeSet::new();
    for &cc in order.iter().rev() {
        if !catalog.is_application(cc) || needed_now.contains(&cc) {
            needed_now.insert(cc);
            needed_now.extend(
                catalog
                    .requirements(cc)
                    .iter()
                    .copied()
                    .filter(|r| members.contains(r)),
            );
        }
    }

    let (ordered, deferred): (Vec<_>, Vec<_>) = order
        .into_iter()
        .partition(|cc| needed_now.contains(cc));
    Ok(CcPlan { ordered, deferred })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Every CC after all of its requirements within `ccs`. `Err` carries one
/// cycle, first vertex repeated at the end.
pub fn topological_order(
    catalog: &CcCatalog,
    ccs: &[CommandClass],
) -> Result<Vec<CommandClass>, Vec<CommandClass>> {
    let set: BTreeSet<CommandClass> = ccs.iter().copied().collect();
    let mut marks: HashMap<CommandClass, Mark> = HashMap::new();
    let mut path = Vec::new();
    let mut order = Vec::with_capacity(set.len());

    for &cc in &set {
        visit(catalog, &set, cc, &mut marks, &mut path, &mut order)?;
    }
    Ok(order)
}

fn visit(
    catalog: &CcCatalog,
    set: &BTreeSet<CommandClass>,
    cc: CommandClass,
    marks: &mut HashMap<CommandClass, Mark>,
    path: &mut Vec<CommandClass>,
    order: &mut Vec<CommandClass>,
) -> Result<(), Vec<CommandClass>> {
    match marks.get(&cc) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|c| *c == cc).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(cc);
            return Err(cycle);
        }
        None => {}
    }

    marks.insert(cc, Mark::Visiting);
    path.push(cc);
    let mut requirements: Vec<CommandClass> = catalog
        .requirements(cc)
        .iter()
        .copied()
        .filter(|r| set.contains(r))
        .collect();
    requirements.sort();
    for req in requirements {
        visit(catalog, set, req, marks, path, order)?;
    }
    path.pop();
    marks.insert(cc, Mark::Done);
    order.push(cc);
    Ok(())
}
