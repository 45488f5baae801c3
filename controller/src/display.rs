use std::{cell::RefCell, rc::Rc};

use tracing::info;

use thermostat_common::{Event, EventBus, EventKind, ThermostatCore, TimerHandle};

/// Render target for the status panel.
pub trait Screen {
    fn render(&mut self, lines: &[String]);
    fn set_backlight(&mut self, on: bool);
}

/// Screen that writes to the log, for hosts without a panel.
#[derive(Debug, Default)]
pub struct LogScreen;

impl Screen for LogScreen {
    fn render(&mut self, lines: &[String]) {
        info!(target: "display", "{}", lines.join(" | "));
    }

    fn set_backlight(&mut self, on: bool) {
        info!(target: "display", on, "backlight");
    }
}

struct Panel<S> {
    screen: S,
    backlight: bool,
}

impl<S: Screen> Panel<S> {
    fn wake(&mut self) {
        if !self.backlight {
            self.backlight = true;
            self.screen.set_backlight(true);
        }
    }

    fn sleep(&mut self) {
        if self.backlight {
            self.backlight = false;
            self.screen.set_backlight(false);
        }
    }
}

/// Renders state and settings changes and dims the backlight after
/// `backlight_secs` without user interaction.
pub fn install<S: Screen + 'static>(bus: &EventBus<ThermostatCore>, screen: S, backlight_secs: f64) -> TimerHandle {
    let panel = Rc::new(RefCell::new(Panel {
        screen,
        backlight: false,
    }));

    let backlight_timer = {
        let panel = panel.clone();
        bus.install_timer(backlight_secs, true, move |_| {
            panel.borrow_mut().sleep();
            Ok(())
        })
    };

    {
        let panel = panel.clone();
        bus.install_event_handler(EventKind::ThermostatStateChanging, move |_, event| {
            if let Event::ThermostatStateChanging { new_state } = event {
                panel
                    .borrow_mut()
                    .screen
                    .render(&[format!("switching to {new_state}")]);
            }
            Ok(())
        });
    }

    for kind in [EventKind::ThermostatStateChanged, EventKind::SettingsChanged] {
        let panel = panel.clone();
        bus.install_event_handler(kind, move |bus, _| {
            let lines = status_lines(bus.context());
            panel.borrow_mut().screen.render(&lines);
            Ok(())
        });
    }

    {
        let panel = panel.clone();
        let timer = backlight_timer.clone();
        bus.install_event_handler(EventKind::UserInteraction, move |_, _| {
            panel.borrow_mut().wake();
            timer.reset(None);
            Ok(())
        });
    }

    panel.borrow_mut().wake();
    backlight_timer
}

fn status_lines(core: &ThermostatCore) -> Vec<String> {
    let status = core.status();
    let temperature = status
        .current_temp
        .map(|value| format!("{value:.1}F"))
        .unwrap_or_else(|| "--".to_string());
    vec![
        format!("{temperature} {}", status.state),
        format!(
            "{} {} {:.0}-{:.0}",
            status.mode, status.program, status.comfort_min, status.comfort_max
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermostat_common::{Interaction, RelayBank, ThermostatConfig};

    #[derive(Clone, Default)]
    struct RecordingScreen {
        frames: Rc<RefCell<Vec<Vec<String>>>>,
        backlight: Rc<RefCell<Vec<bool>>>,
    }

    impl Screen for RecordingScreen {
        fn render(&mut self, lines: &[String]) {
            self.frames.borrow_mut().push(lines.to_vec());
        }

        fn set_backlight(&mut self, on: bool) {
            self.backlight.borrow_mut().push(on);
        }
    }

    fn bus() -> EventBus<ThermostatCore> {
        let (relays, _journal) = RelayBank::in_memory();
        let core = ThermostatCore::new(&ThermostatConfig::default(), relays, Box::new(|| None))
            .unwrap();
        EventBus::new(core)
    }

    #[test]
    fn renders_settings_changes() {
        let bus = bus();
        let screen = RecordingScreen::default();
        install(&bus, screen.clone(), 30.0);

        bus.fire_event(Event::SettingsChanged);
        bus.process_events(1.0);

        assert_eq!(
            screen.frames.borrow().last().cloned(),
            Some(vec!["-- OFF".to_string(), "OFF home 68-76".to_string()])
        );
    }

    #[test]
    fn backlight_dims_then_wakes_on_interaction() {
        let bus = bus();
        let screen = RecordingScreen::default();
        let timer = install(&bus, screen.clone(), 30.0);

        bus.process_events(1.0);
        bus.process_events(31.0);
        assert_eq!(*screen.backlight.borrow(), vec![true, false]);
        assert!(!timer.is_queued());

        bus.fire_event(Event::UserInteraction {
            kind: Interaction::Wake,
        });
        bus.process_events(40.0);

        assert_eq!(*screen.backlight.borrow(), vec![true, false, true]);
        assert!(timer.is_queued());
    }
}
