use std::{cell::RefCell, rc::Rc};

use tracing::{debug, info};

use crate::types::{RelaySnapshot, ThermostatState};

/// Hardware side of a relay.
pub trait RelayDriver {
    /// Runs before the logical state changes; `open` is the requested position.
    fn before_toggle(&mut self, _function: ThermostatState, _open: bool) {}

    fn open(&mut self, function: ThermostatState) -> anyhow::Result<()>;

    fn close(&mut self, function: ThermostatState) -> anyhow::Result<()>;
}

pub type RelayListener = Box<dyn FnMut(ThermostatState, bool)>;

pub struct Relay {
    function: ThermostatState,
    is_open: Option<bool>,
    listeners: Vec<RelayListener>,
    driver: Box<dyn RelayDriver>,
}

impl Relay {
    pub fn new(function: ThermostatState, driver: Box<dyn RelayDriver>) -> Self {
        Self {
            function,
            is_open: None,
            listeners: Vec::new(),
            driver,
        }
    }

    pub fn function(&self) -> ThermostatState {
        self.function
    }

    /// `None` until the relay is first commanded.
    pub fn is_open(&self) -> Option<bool> {
        self.is_open
    }

    pub fn on_change<F>(&mut self, listener: F)
    where
        F: FnMut(ThermostatState, bool) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn open(&mut self) -> anyhow::Result<()> {
        self.toggle(true)
    }

    pub fn close(&mut self) -> anyhow::Result<()> {
        self.toggle(false)
    }

    fn toggle(&mut self, open: bool) -> anyhow::Result<()> {
        self.driver.before_toggle(self.function, open);
        self.is_open = Some(open);
        for listener in &mut self.listeners {
            listener(self.function, open);
        }
        debug!(relay = %self.function, open, "relay toggled");
        if open {
            self.driver.open(self.function)
        } else {
            self.driver.close(self.function)
        }
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            function: self.function,
            is_open: self.is_open,
        }
    }
}

/// The HEAT, COOL and FAN relays. OFF has no relay.
pub struct RelayBank {
    relays: Vec<Relay>,
}

impl RelayBank {
    pub const FUNCTIONS: [ThermostatState; 3] = [
        ThermostatState::Heating,
        ThermostatState::Cooling,
        ThermostatState::Fan,
    ];

    pub fn new<F>(mut driver_for: F) -> Self
    where
        F: FnMut(ThermostatState) -> Box<dyn RelayDriver>,
    {
        let relays = Self::FUNCTIONS
            .into_iter()
            .map(|function| Relay::new(function, driver_for(function)))
            .collect();
        Self { relays }
    }

    /// Relays that only log their commands, for hosts without relay hardware.
    pub fn logging() -> Self {
        Self::new(|_| Box::new(LogRelayDriver))
    }

    /// All three relays share one in-memory journal.
    pub fn in_memory() -> (Self, RelayJournal) {
        let journal = RelayJournal::default();
        let bank = Self::new(|_| Box::new(MemoryRelayDriver::new(journal.clone())));
        (bank, journal)
    }

    pub fn get(&self, function: ThermostatState) -> Option<&Relay> {
        self.relays.iter().find(|relay| relay.function == function)
    }

    pub fn get_mut(&mut self, function: ThermostatState) -> Option<&mut Relay> {
        self.relays.iter_mut().find(|relay| relay.function == function)
    }

    pub fn open(&mut self, function: ThermostatState) -> anyhow::Result<()> {
        match self.get_mut(function) {
            Some(relay) => relay.open(),
            None => Ok(()),
        }
    }

    pub fn close(&mut self, function: ThermostatState) -> anyhow::Result<()> {
        match self.get_mut(function) {
            Some(relay) => relay.close(),
            None => Ok(()),
        }
    }

    pub fn on_change<F>(&mut self, listener: F)
    where
        F: FnMut(ThermostatState, bool) + Clone + 'static,
    {
        for relay in &mut self.relays {
            relay.on_change(listener.clone());
        }
    }

    pub fn closed(&self) -> Vec<ThermostatState> {
        self.relays
            .iter()
            .filter(|relay| relay.is_open == Some(false))
            .map(Relay::function)
            .collect()
    }

    pub fn snapshots(&self) -> Vec<RelaySnapshot> {
        self.relays.iter().map(Relay::snapshot).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    Open(ThermostatState),
    Close(ThermostatState),
}

/// Shared record of driver commands, in issue order.
#[derive(Debug, Clone, Default)]
pub struct RelayJournal {
    commands: Rc<RefCell<Vec<RelayCommand>>>,
}

impl RelayJournal {
    pub fn commands(&self) -> Vec<RelayCommand> {
        self.commands.borrow().clone()
    }

    pub fn clear(&self) {
        self.commands.borrow_mut().clear();
    }

    fn push(&self, command: RelayCommand) {
        self.commands.borrow_mut().push(command);
    }
}

/// Driver without hardware that only logs commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRelayDriver;

impl RelayDriver for LogRelayDriver {
    fn open(&mut self, function: ThermostatState) -> anyhow::Result<()> {
        info!(relay = %function, "relay open");
        Ok(())
    }

    fn close(&mut self, function: ThermostatState) -> anyhow::Result<()> {
        info!(relay = %function, "relay closed");
        Ok(())
    }
}

/// Driver without hardware that records every command in a journal.
#[derive(Debug, Clone)]
pub struct MemoryRelayDriver {
    journal: RelayJournal,
}

impl MemoryRelayDriver {
    pub fn new(journal: RelayJournal) -> Self {
        Self { journal }
    }
}

impl RelayDriver for MemoryRelayDriver {
    fn open(&mut self, function: ThermostatState) -> anyhow::Result<()> {
        debug!(relay = %function, "relay open");
        self.journal.push(RelayCommand::Open(function));
        Ok(())
    }

    fn close(&mut self, function: ThermostatState) -> anyhow::Result<()> {
        debug!(relay = %function, "relay closed");
        self.journal.push(RelayCommand::Close(function));
        Ok(())
    }
}
