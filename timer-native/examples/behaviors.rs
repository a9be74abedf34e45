use {
    chrono::TimeDelta,
    std::{sync::Arc, time::Duration},
    timer_native::{ClockBehavior, ManualClock, ManualScheduler, NativeScheduler, SystemClock, Timer, TimerConfig},
};

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    println!("Arming one native timer per behavior...");
    let config = TimerConfig::from_env().expect("timer environment variables are valid");
    let scheduler = NativeScheduler::new(&config);
    let timers: Vec<_> = ClockBehavior::ALL
        .into_iter()
        .map(|behavior| {
            let timer = Arc::new(Timer::with_clock(
                Arc::new(SystemClock),
                &config,
                behavior,
                TimeDelta::milliseconds(200),
                behavior,
                |timer, behavior| println!("{behavior} timer fired {} late", timer.time_since_fire_date()),
            ));
            timer.schedule(&scheduler).expect("fresh timer can be scheduled");
            timer
        })
        .collect();

    for timer in &timers {
        let outcome = futures::executor::block_on(timer.completion());
        println!("{} -> {outcome:?} (fire date {})", timer.behavior(), timer.fire_date());
    }

    println!("Simulating a two hour sleep on a manual clock...");
    let clock = Arc::new(ManualClock::new());
    let manual = ManualScheduler::new(clock.clone());
    let mut armed = Vec::new();
    for behavior in ClockBehavior::ALL {
        let timer = Arc::new(Timer::with_clock(
            clock.clone(),
            &TimerConfig::default(),
            behavior,
            TimeDelta::seconds(5),
            (),
            move |_, _| println!("{behavior} fired"),
        ));
        timer.schedule(&manual).expect("fresh timer can be scheduled");
        // the scheduler only holds a weak reference
        armed.push(timer);
    }

    clock.suspend(Duration::from_secs(2 * 60 * 60));
    println!("after sleep: {} fired", manual.run_due());
    clock.advance(Duration::from_secs(5));
    println!("5s after wake: {} fired", manual.run_due());
}
