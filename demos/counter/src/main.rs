use std::cell::RefCell;
use std::rc::Rc;

use anyhow::anyhow;
use web_time::Instant;

use arbor_core::testing::MemoryHost;
use arbor_core::{FunctionComponent, Node, ReconcilerError, RootOptions, SetState, component, host};
use arbor_devtools::{Inspector, dump_tree};

type Clicker = Rc<RefCell<Option<SetState<i64>>>>;

fn counter(clicker: Clicker) -> FunctionComponent {
    FunctionComponent::new("Counter", move |cx, _| {
        let (count, set_count) = cx.use_state(|| 0i64);
        *clicker.borrow_mut() = Some(set_count);
        cx.use_effect(Some(vec![count.into()]), move || {
            log::info!("count is {count}");
            Ok(None)
        });
        Ok(host("div")
            .attr("class", "counter")
            .children([
                host("span").child(format!("Count: {count}")).into(),
                host("button").child("Increment").into(),
            ])
            .into())
    })
}

// ReconcilerError holds Rc'd user errors, so it can't cross into anyhow as is
fn check<T>(result: Result<T, ReconcilerError>) -> anyhow::Result<T> {
    result.map_err(|e| anyhow!("{e}"))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let started = Instant::now();

    let mut r = arbor_core::Reconciler::new(MemoryHost::new());
    let mut inspector = Inspector::new();
    inspector.log_commits = true;
    inspector.attach(&mut r);

    let container = r.host_mut().create_root();
    let root = r.create_container(
        container,
        RootOptions {
            concurrent: true,
            ..Default::default()
        },
    );

    let clicker: Clicker = Rc::default();
    let app: Node = component(&counter(clicker.clone())).into();
    check(r.update_container(root, app, None, None))?;
    check(r.run_scheduled_tasks())?;
    println!("{}", r.host().render(container));

    for _ in 0..3 {
        let set_count = clicker
            .borrow()
            .clone()
            .ok_or_else(|| anyhow!("counter never rendered"))?;
        r.host_mut().advance_time(started.elapsed().as_secs_f64() * 1000.0);
        check(r.interactive_updates(|_| set_count.update(|c| c + 1)))?;
        check(r.flush_interactive_updates())?;
        check(r.run_scheduled_tasks())?;
        println!("{}", r.host().render(container));
    }

    print!("{}", dump_tree(&r, root));
    println!("{}", inspector.stats().summary());
    Ok(())
}
