use std::{
    cell::RefCell,
    rc::Rc,
    sync::mpsc,
    thread,
    time::Duration,
};

use pretty_assertions::assert_eq;
use thermostat_common::*;

fn single_program_config(
    name: &str,
    comfort_min: f32,
    comfort_max: f32,
    price_overrides: Vec<PriceOverride>,
    initial_mode: ThermostatMode,
) -> ThermostatConfig {
    ThermostatConfig {
        delta: 1.0,
        initial_mode,
        fan_runout_secs: 120.0,
        price_window_secs: 900.0,
        schedule_poll_secs: 60.0,
        default_program: name.to_string(),
        programs: vec![ProgramConfig {
            name: name.to_string(),
            comfort_min,
            comfort_max,
            price_overrides,
        }],
        schedules: Vec::new(),
    }
}

fn build(config: &ThermostatConfig) -> (EventBus<ThermostatCore>, RelayJournal) {
    let (relays, journal) = RelayBank::in_memory();
    let core = ThermostatCore::new(config, relays, Box::new(|| None)).unwrap();
    let bus = EventBus::new(core);
    ThermostatCore::install(&bus);
    (bus, journal)
}

fn feed_temperature(bus: &EventBus<ThermostatCore>, temperature: f32, now: f64) {
    bus.fire_event(Event::SensorDataChanged {
        temperature,
        pressure: 1013.0,
        humidity: 45.0,
    });
    bus.process_events(now);
}

#[test]
fn away_program_price_override_and_revert() {
    let config = single_program_config(
        "away",
        64.0,
        78.0,
        vec![PriceOverride {
            price: 0.25,
            comfort_min: None,
            comfort_max: Some(82.0),
        }],
        ThermostatMode::Auto,
    );
    let (bus, _journal) = build(&config);
    let settings_changes = Rc::new(RefCell::new(0));
    let counter = settings_changes.clone();
    bus.install_event_handler(EventKind::SettingsChanged, move |_, _| {
        *counter.borrow_mut() += 1;
        Ok(())
    });

    bus.fire_event(Event::PowerPriceChanged {
        price: 0.30,
        next_update_secs: 900,
    });
    bus.process_events(10.0);

    let status = bus.context().status();
    assert!(status.in_price_override);
    assert_eq!(status.comfort_max, 82.0);
    assert_eq!(status.comfort_min, 64.0);

    bus.fire_event(Event::PowerPriceChanged {
        price: 0.10,
        next_update_secs: 900,
    });
    bus.process_events(910.0);

    let status = bus.context().status();
    assert!(!status.in_price_override);
    assert_eq!(status.comfort_max, 78.0);
    assert_eq!(*settings_changes.borrow(), 2);
}

#[test]
fn heating_hysteresis_then_runout_to_off() {
    let config = single_program_config("test", 68.0, 78.0, Vec::new(), ThermostatMode::Heat);
    let (bus, journal) = build(&config);

    feed_temperature(&bus, 65.0, 1.0);
    assert_eq!(bus.context().state(), ThermostatState::Heating);

    feed_temperature(&bus, 68.5, 2.0);
    assert_eq!(bus.context().state(), ThermostatState::Heating);

    feed_temperature(&bus, 69.5, 3.0);
    assert_eq!(bus.context().state(), ThermostatState::Fan);
    assert!(bus.context().runout_pending());

    // The runout period starts at the next poll.
    bus.process_events(4.0);
    feed_temperature(&bus, 69.5, 60.0);
    bus.process_events(123.0);
    assert_eq!(bus.context().state(), ThermostatState::Fan);

    bus.process_events(124.0);
    assert_eq!(bus.context().state(), ThermostatState::Off);
    assert!(!bus.context().runout_pending());
    assert!(bus.context().relays().closed().is_empty());

    assert_eq!(
        journal.commands(),
        vec![
            RelayCommand::Close(ThermostatState::Fan),
            RelayCommand::Close(ThermostatState::Heating),
            RelayCommand::Open(ThermostatState::Heating),
            RelayCommand::Close(ThermostatState::Fan),
            RelayCommand::Open(ThermostatState::Fan),
        ]
    );
}

#[test]
fn auto_mode_swings_from_heat_to_cool_without_overlap() {
    let config = single_program_config("test", 68.0, 74.0, Vec::new(), ThermostatMode::Auto);
    let (bus, _journal) = build(&config);
    let overlaps = Rc::new(RefCell::new(0));
    let counter = overlaps.clone();
    bus.install_event_handler(EventKind::ThermostatStateChanged, move |bus, _| {
        let closed = bus.context().relays().closed();
        if closed.contains(&ThermostatState::Heating) && closed.contains(&ThermostatState::Cooling) {
            *counter.borrow_mut() += 1;
        }
        Ok(())
    });

    feed_temperature(&bus, 60.0, 1.0);
    feed_temperature(&bus, 80.0, 2.0);

    assert_eq!(bus.context().state(), ThermostatState::Cooling);
    assert_eq!(
        bus.context().relays().closed(),
        vec![ThermostatState::Cooling, ThermostatState::Fan]
    );
    assert_eq!(*overlaps.borrow(), 0);
}

#[test]
fn one_shot_timer_fires_once() {
    let bus = EventBus::new(());
    let fired = Rc::new(RefCell::new(0));
    let counter = fired.clone();
    let handle = bus.install_timer(60.0, true, move |_| {
        *counter.borrow_mut() += 1;
        Ok(())
    });

    bus.process_events(1.0);
    assert!(handle.is_queued());

    bus.process_events(71.0);
    assert_eq!(*fired.borrow(), 1);
    assert!(!handle.is_queued());

    bus.process_events(7_071.0);
    assert_eq!(*fired.borrow(), 1);
}

#[test]
fn three_producers_deliver_three_events() {
    let bus = EventBus::new(());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    bus.install_event_handler(EventKind::PowerPriceChanged, move |_, event| {
        sink.borrow_mut().push(event.clone());
        Ok(())
    });

    let workers: Vec<_> = (0..3)
        .map(|index| {
            let handle = bus.handle();
            thread::spawn(move || {
                handle.fire_event(Event::PowerPriceChanged {
                    price: index as f64,
                    next_update_secs: 60,
                });
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    bus.process_events(1.0);

    assert_eq!(seen.borrow().len(), 3);
}

#[test]
fn api_calls_marshal_onto_a_running_loop() {
    let (handle_tx, handle_rx) = mpsc::channel();
    let config = single_program_config("home", 68.0, 76.0, Vec::new(), ThermostatMode::Off);

    let loop_thread = thread::spawn(move || {
        let (relays, _journal) = RelayBank::in_memory();
        let core = ThermostatCore::new(&config, relays, Box::new(|| None)).unwrap();
        let bus = EventBus::new(core);
        ThermostatCore::install(&bus);
        handle_tx.send(bus.handle()).unwrap();
        bus.exec(None);
    });

    let handle: BusHandle<ThermostatCore> = handle_rx.recv().unwrap();
    handle
        .safe_invoke(|bus| {
            bus.context().set_mode(bus, ThermostatMode::Heat);
            Ok(())
        })
        .unwrap();
    handle.fire_event(Event::SensorDataChanged {
        temperature: 62.0,
        pressure: 1010.0,
        humidity: 50.0,
    });

    let mut state = String::new();
    for _ in 0..50 {
        state = handle
            .safe_invoke_timeout(Duration::from_secs(5), |bus| {
                Ok(bus.context().status().state.to_string())
            })
            .unwrap();
        if state == "HEATING" {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(state, "HEATING");

    handle.stop();
    loop_thread.join().unwrap();
    assert!(matches!(
        handle.safe_invoke(|_| Ok(())),
        Err(InvokeError::Stopped)
    ));
}
