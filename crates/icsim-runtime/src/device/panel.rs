//! Operator panels: remote-only views over controller registers.

use std::fmt::Write as _;
use std::sync::Arc;

use smol_str::SmolStr;
use tracing::info;

use crate::error::RuntimeError;
use crate::scheduler::{CycleTiming, TickBehavior};
use crate::tag::TagRegistry;
use crate::value::TagValue;

use super::{absorb_transient, ControllerAddresses, NetworkLink};

/// A device owning no tags; every access goes to the owning controller.
#[derive(Debug)]
pub struct Panel {
    name: SmolStr,
    link: NetworkLink,
}

impl Panel {
    pub fn new(
        name: impl Into<SmolStr>,
        tags: Arc<TagRegistry>,
        addresses: &ControllerAddresses,
    ) -> Result<Self, RuntimeError> {
        let name = name.into();
        let link = NetworkLink::new(tags, addresses, None)?;
        info!(device = %name, "panel created");
        Ok(Self { name, link })
    }

    #[must_use]
    pub fn with_link(name: impl Into<SmolStr>, link: NetworkLink) -> Self {
        Self {
            name: name.into(),
            link,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn tags(&self) -> &Arc<TagRegistry> {
        self.link.tags()
    }

    /// Read `tag` from its owner; `None` when the owner is unreachable.
    pub fn get(&mut self, tag: &str) -> Result<Option<TagValue>, RuntimeError> {
        let result = self.link.receive(tag);
        absorb_transient(&self.name, tag, result)
    }

    /// Operator write to `tag` on its owner. Returns whether it was delivered.
    pub fn set(&mut self, tag: &str, value: &TagValue) -> Result<bool, RuntimeError> {
        let result = self.link.send(tag, value);
        Ok(absorb_transient(&self.name, tag, result)?.is_some())
    }

    /// Every configured tag with its current remote value, in registry order.
    pub fn read_all(&mut self) -> Result<Vec<(SmolStr, Option<TagValue>)>, RuntimeError> {
        let names: Vec<SmolStr> = self.tags().iter().map(|tag| tag.name.clone()).collect();
        names
            .into_iter()
            .map(|name| {
                let value = self.get(&name)?;
                Ok((name, value))
            })
            .collect()
    }
}

/// Render rows as an aligned two-column table, `N/A` for absent values.
#[must_use]
pub fn render_table(rows: &[(SmolStr, Option<TagValue>)]) -> String {
    let width = rows
        .iter()
        .map(|(name, _)| name.len())
        .chain(std::iter::once("tag".len()))
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    let _ = writeln!(out, "{:<width$} | value", "tag");
    let _ = writeln!(out, "{:-<width$}-+------", "");
    for (name, value) in rows {
        match value {
            Some(value) => {
                let _ = writeln!(out, "{name:<width$} | {value}");
            }
            None => {
                let _ = writeln!(out, "{name:<width$} | N/A");
            }
        }
    }
    out
}

/// Panel behavior run once per tick.
pub trait PanelLogic: Send + 'static {
    fn run(&mut self, panel: &mut Panel, timing: &CycleTiming) -> Result<(), RuntimeError>;
}

impl<F> PanelLogic for F
where
    F: FnMut(&mut Panel, &CycleTiming) -> Result<(), RuntimeError> + Send + 'static,
{
    fn run(&mut self, panel: &mut Panel, timing: &CycleTiming) -> Result<(), RuntimeError> {
        self(panel, timing)
    }
}

/// Default panel logic: read every tag and report the table.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableView;

impl PanelLogic for TableView {
    fn run(&mut self, panel: &mut Panel, timing: &CycleTiming) -> Result<(), RuntimeError> {
        let rows = panel.read_all()?;
        let table = render_table(&rows);
        info!(
            device = %panel.name,
            cycle_ms = timing.current_cycle_ms(),
            "tag table\n{table}"
        );
        Ok(())
    }
}

/// Scheduler behavior wrapping a [`Panel`] and its logic.
#[derive(Debug)]
pub struct PanelDevice<L = TableView> {
    panel: Panel,
    logic: L,
}

impl<L: PanelLogic> PanelDevice<L> {
    #[must_use]
    pub fn new(panel: Panel, logic: L) -> Self {
        Self { panel, logic }
    }

    #[must_use]
    pub fn panel(&self) -> &Panel {
        &self.panel
    }
}

impl<L: PanelLogic> TickBehavior for PanelDevice<L> {
    fn name(&self) -> &str {
        self.panel.name()
    }

    fn logic(&mut self, timing: &CycleTiming) -> Result<(), RuntimeError> {
        self.logic.run(&mut self.panel, timing)
    }
}
