use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::class::{ClassCx, Component, Updater, class_component};
use crate::element::{FunctionComponent, Node, Portal, PropValue, Props, Ref, component, host, profiler, suspense};
use crate::error::{Invariant, ReconcilerError, RenderResult, RenderSignal, UserError};
use crate::fiber::RootId;
use crate::hooks::{Dispatch, EffectResult, on_unmount};
use crate::profiler::ProfilerPhase;
use crate::reconciler::{Reconciler, RootOptions};
use crate::suspense::WaitHandle;
use crate::testing::{MemoryHost, NodeId, PersistentHost};

type Log = Rc<RefCell<Vec<String>>>;

fn legacy() -> (Reconciler<MemoryHost>, RootId, NodeId) {
    let mut r = Reconciler::new(MemoryHost::new());
    let container = r.host_mut().create_root();
    let root = r.create_container(container, RootOptions::default());
    (r, root, container)
}

fn concurrent() -> (Reconciler<MemoryHost>, RootId, NodeId) {
    let mut r = Reconciler::new(MemoryHost::new());
    let container = r.host_mut().create_root();
    let root = r.create_container(
        container,
        RootOptions {
            concurrent: true,
            ..Default::default()
        },
    );
    (r, root, container)
}

fn take(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.borrow_mut())
}

#[test]
fn test_text_change_is_a_single_text_update() {
    let (mut r, root, container) = legacy();
    r.render(root, host("div").child("a")).unwrap();
    assert_eq!(r.host().render(container), "<div>a</div>");
    r.host_mut().take_ops();

    r.render(root, host("div").child("b")).unwrap();
    insta::assert_snapshot!(r.host_mut().take_ops().join("\n"), @r#"
    prepare_for_commit
    text #1 "a" -> "b"
    reset_after_commit
    "#);
    assert_eq!(r.host().render(container), "<div>b</div>");
}

#[test]
fn test_identical_element_bails_out() {
    let renders = Rc::new(Cell::new(0));
    let seen = renders.clone();
    let leaf = FunctionComponent::new("Leaf", move |_, _| {
        seen.set(seen.get() + 1);
        Ok(host("i").child("leaf").into())
    });
    let (mut r, root, container) = legacy();
    let tree: Node = host("div").child(component(&leaf)).into();
    r.render(root, tree.clone()).unwrap();
    let before = r.host().children(container).to_vec();
    r.host_mut().take_ops();

    r.render(root, tree).unwrap();
    assert_eq!(renders.get(), 1);
    assert_eq!(r.host().children(container), before.as_slice());
    insta::assert_snapshot!(r.host_mut().take_ops().join("\n"), @r#"
    prepare_for_commit
    reset_after_commit
    "#);
}

fn layout_logger(name: &'static str, log: &Log) -> FunctionComponent {
    let log = log.clone();
    FunctionComponent::new(name, move |cx, props| {
        let l = log.clone();
        cx.use_layout_effect(None, move || -> EffectResult {
            l.borrow_mut().push(format!("mount {name}"));
            let l = l.clone();
            on_unmount(move || l.borrow_mut().push(format!("unmount {name}")))
        });
        Ok(props.children().clone())
    })
}

#[test]
fn test_effects_commit_children_first_left_to_right() {
    let log: Log = Rc::default();
    let a = layout_logger("A", &log);
    let b = layout_logger("B", &log);
    let p = layout_logger("P", &log);
    let tree = || -> Node {
        component(&p)
            .child(host("div").children([component(&a).into(), component(&b).into()]))
            .into()
    };
    let (mut r, root, _) = legacy();
    r.render(root, tree()).unwrap();
    insta::assert_debug_snapshot!(take(&log), @r#"
    [
        "mount A",
        "mount B",
        "mount P",
    ]
    "#);

    // cleanups all run in the mutation pass, before any new layout effect
    r.render(root, tree()).unwrap();
    insta::assert_debug_snapshot!(take(&log), @r#"
    [
        "unmount A",
        "unmount B",
        "unmount P",
        "mount A",
        "mount B",
        "mount P",
    ]
    "#);
}

#[test]
fn test_urgent_update_renders_first_without_losing_the_deferred_one() {
    let slot: Rc<RefCell<Option<Dispatch<char>>>> = Rc::default();
    let out = slot.clone();
    let app = FunctionComponent::new("App", move |cx, _| {
        let (s, dispatch) = cx.use_reducer(|s: &String, c: &char| format!("{s}{c}"), String::new);
        *out.borrow_mut() = Some(dispatch);
        Ok(host("p").child(format!("[{s}]")).into())
    });
    let (mut r, root, container) = concurrent();
    r.update_container(root, component(&app), None, None).unwrap();
    r.run_scheduled_tasks().unwrap();
    assert_eq!(r.host().render(container), "<p>[]</p>");
    let dispatch = slot.borrow().clone().unwrap();

    r.deferred_updates(|_| dispatch.dispatch('a')).unwrap();
    r.flush_sync(|_| dispatch.dispatch('b')).unwrap();
    assert_eq!(r.host().render(container), "<p>[b]</p>");

    // the deferred update replays in insertion order
    r.run_scheduled_tasks().unwrap();
    assert_eq!(r.host().render(container), "<p>[ab]</p>");
}

#[test]
fn test_deletion_unmounts_before_replacement_mounts() {
    let log: Log = Rc::default();
    let l = log.clone();
    let item = FunctionComponent::new("Item", move |cx, props| {
        let name = props.str("name").unwrap_or_default().to_string();
        let (effect_log, ref_log) = (l.clone(), l.clone());
        let effect_name = name.clone();
        cx.use_layout_effect(Some(vec![]), move || -> EffectResult {
            effect_log.borrow_mut().push(format!("mount {effect_name}"));
            let l = effect_log.clone();
            on_unmount(move || l.borrow_mut().push(format!("unmount {effect_name}")))
        });
        let ref_name = name.clone();
        let r = Ref::callback(move |target| {
            let state = if target.is_some() { "set" } else { "null" };
            ref_log.borrow_mut().push(format!("ref {ref_name} {state}"));
            Ok(())
        });
        Ok(host("div").ref_(r).child(name).into())
    });
    let slot = |name: &str| -> Node {
        host("section")
            .child(component(&item).key(name).attr("name", name))
            .into()
    };
    let (mut r, root, container) = legacy();
    r.render(root, slot("x")).unwrap();
    assert_eq!(take(&log), vec!["ref x set", "mount x"]);

    r.render(root, slot("y")).unwrap();
    insta::assert_debug_snapshot!(take(&log), @r#"
    [
        "unmount x",
        "ref x null",
        "ref y set",
        "mount y",
    ]
    "#);
    assert_eq!(r.host().render(container), "<section><div>y</div></section>");
}

#[test]
fn test_suspended_content_is_hidden_then_restored() {
    let ready = Rc::new(Cell::new(true));
    let wait = Rc::new(RefCell::new(WaitHandle::new()));
    let (is_ready, pending) = (ready.clone(), wait.clone());
    let data = FunctionComponent::new("Data", move |_, _| {
        if is_ready.get() {
            Ok(Node::from("data"))
        } else {
            Err(RenderSignal::Suspended(pending.borrow().clone()))
        }
    });
    let tree = || -> Node { suspense("loading", host("div").child(component(&data))).into() };
    let (mut r, root, container) = legacy();
    r.render(root, tree()).unwrap();
    assert_eq!(r.host().render(container), "<div>data</div>");

    ready.set(false);
    r.render(root, tree()).unwrap();
    // the primary host nodes stay mounted, only hidden
    assert_eq!(r.host().render(container), "<div hidden>data</div>loading");
    assert!(r.host().ops().iter().any(|op| op.starts_with("hide")));
    assert!(!r.host().ops().iter().any(|op| op.starts_with("remove")));

    r.host_mut().take_ops();
    ready.set(true);
    wait.borrow().resolve();
    r.flush_updates().unwrap();
    assert_eq!(r.host().render(container), "<div>data</div>");
    let ops = r.host().ops();
    assert!(ops.iter().any(|op| op.starts_with("unhide")));
    assert!(ops.iter().any(|op| op.starts_with("remove")));
}

#[test]
fn test_skipping_a_hook_is_detected() {
    let app = FunctionComponent::new("App", |cx, props| {
        let _ = cx.use_state(|| 0i64);
        if props.bool("extra").unwrap_or(false) {
            let _ = cx.use_ref(|| 0i64);
        }
        Ok(Node::Empty)
    });
    let (mut r, root, _) = legacy();
    r.render(root, component(&app).attr("extra", true)).unwrap();
    let err = r.render(root, component(&app).attr("extra", false)).unwrap_err();
    assert!(matches!(err, ReconcilerError::Invariant(Invariant::TooFewHooks)));
}

struct Lifecycles {
    log: Log,
}

impl Component for Lifecycles {
    type State = i64;
    const HAS_SNAPSHOT: bool = true;

    fn create(props: &Props, _updater: Updater<i64>) -> Self {
        let log = props
            .any::<RefCell<Vec<String>>>("log")
            .unwrap_or_default();
        Lifecycles { log }
    }

    fn initial_state(&self, props: &Props) -> i64 {
        props.int("n").unwrap_or(0)
    }

    fn derived_state_from_props(props: &Props, _state: &i64) -> Option<i64> {
        props.int("n")
    }

    fn render(&mut self, cx: &ClassCx<'_, i64>) -> RenderResult {
        Ok(host("span").child(format!("{}", cx.state())).into())
    }

    fn did_mount(&mut self, cx: &ClassCx<'_, i64>) -> Result<(), UserError> {
        self.log.borrow_mut().push(format!("did_mount {}", cx.state()));
        Ok(())
    }

    fn snapshot_before_update(
        &mut self,
        _cx: &ClassCx<'_, i64>,
        _prev_props: &Props,
        prev_state: &i64,
    ) -> Result<Option<Rc<dyn Any>>, UserError> {
        self.log.borrow_mut().push(format!("snapshot {prev_state}"));
        Ok(Some(Rc::new(*prev_state * 10)))
    }

    fn did_update(
        &mut self,
        cx: &ClassCx<'_, i64>,
        _prev_props: &Props,
        prev_state: &i64,
        snapshot: Option<Rc<dyn Any>>,
    ) -> Result<(), UserError> {
        let snapshot = snapshot.and_then(|s| s.downcast_ref::<i64>().copied());
        self.log
            .borrow_mut()
            .push(format!("did_update {prev_state} -> {} ({snapshot:?})", cx.state()));
        Ok(())
    }

    fn will_unmount(&mut self, _cx: &ClassCx<'_, i64>) -> Result<(), UserError> {
        self.log.borrow_mut().push("will_unmount".into());
        Ok(())
    }
}

#[test]
fn test_class_lifecycles_run_in_commit_order() {
    let log: Log = Rc::default();
    let el = |n: i64| -> Node {
        class_component::<Lifecycles>()
            .attr("n", n)
            .attr("log", PropValue::Any(log.clone()))
            .into()
    };
    let (mut r, root, container) = legacy();
    r.render(root, el(1)).unwrap();
    r.render(root, el(2)).unwrap();
    assert_eq!(r.host().render(container), "<span>2</span>");
    r.render(root, Node::Empty).unwrap();
    insta::assert_debug_snapshot!(take(&log), @r#"
    [
        "did_mount 1",
        "snapshot 1",
        "did_update 1 -> 2 (Some(10))",
        "will_unmount",
    ]
    "#);
}

#[test]
fn test_portal_children_live_in_their_own_container() {
    let (mut r, root, container) = legacy();
    let elsewhere = r.host_mut().create_root();
    r.render(
        root,
        host("div").child(Portal::new(elsewhere, host("span").child("over there"), None)),
    )
    .unwrap();
    assert_eq!(r.host().render(container), "<div></div>");
    assert_eq!(r.host().render(elsewhere), "<span>over there</span>");

    r.render(root, Node::Empty).unwrap();
    assert_eq!(r.host().render(container), "");
    assert_eq!(r.host().render(elsewhere), "");
}

#[test]
fn test_profiler_reports_mount_then_update() {
    let phases = Rc::new(RefCell::new(Vec::new()));
    let seen = phases.clone();
    let tree = move || -> Node {
        let seen = seen.clone();
        profiler(
            "app",
            move |report| seen.borrow_mut().push((report.id.clone(), report.phase)),
            host("b").child("x"),
        )
        .into()
    };
    let (mut r, root, _) = legacy();
    r.render(root, tree()).unwrap();
    r.render(root, tree()).unwrap();
    assert_eq!(
        *phases.borrow(),
        vec![
            ("app".to_string(), ProfilerPhase::Mount),
            ("app".to_string(), ProfilerPhase::Update),
        ]
    );
}

struct Greeting;

impl Component for Greeting {
    type State = ();

    fn create(_props: &Props, _updater: Updater<()>) -> Self {
        Greeting
    }

    fn initial_state(&self, _props: &Props) {}

    fn render(&mut self, _cx: &ClassCx<'_, ()>) -> RenderResult {
        Ok(Node::from("hello"))
    }
}

struct Farewell;

impl Component for Farewell {
    type State = ();

    fn create(_props: &Props, _updater: Updater<()>) -> Self {
        Farewell
    }

    fn initial_state(&self, _props: &Props) {}

    fn render(&mut self, _cx: &ClassCx<'_, ()>) -> RenderResult {
        Ok(Node::from("bye"))
    }
}

#[test]
fn test_swapping_class_types_remounts() {
    let (mut r, root, container) = legacy();
    r.render(root, host("div").child(class_component::<Greeting>())).unwrap();
    assert_eq!(r.host().render(container), "<div>hello</div>");
    r.host_mut().take_ops();

    r.render(root, host("div").child(class_component::<Farewell>())).unwrap();
    assert_eq!(r.host().render(container), "<div>bye</div>");
    let ops = r.host().ops();
    assert!(ops.iter().any(|op| op.starts_with("create text")));
    assert!(ops.iter().any(|op| op.starts_with("remove")));
}

#[test]
fn test_render_phase_updates_replay_until_stable() {
    let renders = Rc::new(Cell::new(0));
    let seen = renders.clone();
    let app = FunctionComponent::new("App", move |cx, _| {
        seen.set(seen.get() + 1);
        let (n, set_n) = cx.use_state(|| 0i64);
        if n < 3 {
            set_n.set(n + 1);
        }
        Ok(host("p").child(format!("{n}")).into())
    });
    let (mut r, root, container) = legacy();
    r.render(root, component(&app)).unwrap();
    assert_eq!(r.host().render(container), "<p>3</p>");
    assert_eq!(renders.get(), 4);
}

#[test]
fn test_endless_render_phase_updates_hit_the_limit() {
    let app = FunctionComponent::new("App", |cx, _| {
        let (n, set_n) = cx.use_state(|| 0i64);
        set_n.set(n + 1);
        Ok(Node::Empty)
    });
    let (mut r, root, _) = legacy();
    let err = r.render(root, component(&app)).unwrap_err();
    assert!(matches!(err, ReconcilerError::Invariant(Invariant::TooManyReRenders(25))));
}

struct Catcher;

impl Component for Catcher {
    type State = Option<String>;
    const DERIVES_STATE_FROM_ERROR: bool = true;

    fn create(_props: &Props, _updater: Updater<Self::State>) -> Self {
        Catcher
    }

    fn initial_state(&self, _props: &Props) -> Self::State {
        None
    }

    fn derived_state_from_error(error: &UserError, _state: &Self::State) -> Self::State {
        Some(error.message().to_string())
    }

    fn render(&mut self, cx: &ClassCx<'_, Self::State>) -> RenderResult {
        match cx.state() {
            Some(message) => Ok(host("p").child(format!("caught {message}")).into()),
            None => Ok(cx.props().children().clone()),
        }
    }
}

struct FailsToUnmount;

impl Component for FailsToUnmount {
    type State = ();

    fn create(_props: &Props, _updater: Updater<()>) -> Self {
        FailsToUnmount
    }

    fn initial_state(&self, _props: &Props) {}

    fn render(&mut self, _cx: &ClassCx<'_, ()>) -> RenderResult {
        Ok(host("i").child("bomb").into())
    }

    fn will_unmount(&mut self, _cx: &ClassCx<'_, ()>) -> Result<(), UserError> {
        Err(UserError::new("unmount boom"))
    }
}

#[test]
fn test_unmount_error_finishes_commit_then_reaches_boundary() {
    let tree = |n: i64, with_bomb: bool| -> Node {
        let bomb: Node = if with_bomb {
            class_component::<FailsToUnmount>().into()
        } else {
            Node::Empty
        };
        class_component::<Catcher>()
            .child(host("div").children([bomb, host("span").child(format!("sibling {n}")).into()]))
            .into()
    };
    let (mut r, root, container) = legacy();
    r.render(root, tree(1, true)).unwrap();
    assert_eq!(r.host().render(container), "<div><i>bomb</i><span>sibling 1</span></div>");
    r.host_mut().take_ops();

    r.render(root, tree(2, false)).unwrap();
    // the failing commit still removed the bomb and updated its sibling
    let ops = r.host_mut().take_ops();
    assert!(ops.iter().any(|op| op.starts_with("remove")));
    assert!(ops.iter().any(|op| op.ends_with("\"sibling 1\" -> \"sibling 2\"")));
    assert_eq!(r.host().render(container), "<p>caught unmount boom</p>");
}

#[test]
fn test_persistent_host_swaps_container_children() {
    let mut r = Reconciler::new(PersistentHost::new());
    let container = r.host_mut().create_root();
    let root = r.create_container(container, RootOptions::default());
    let tree = |text: &str| -> Node {
        host("div")
            .children([host("span").child(text.to_string()).into(), host("b").into()])
            .into()
    };
    r.render(root, tree("a")).unwrap();
    assert_eq!(r.host().render(container), "<div><span>a</span><b></b></div>");
    let before = r.host().children(container).to_vec();
    r.host_mut().take_ops();

    r.render(root, tree("z")).unwrap();
    assert_eq!(r.host().render(container), "<div><span>z</span><b></b></div>");
    // changed nodes were cloned; the untouched <b> is shared by both trees
    insta::assert_snapshot!(r.host_mut().take_ops().join("\n"), @r#"
    create text #5 "z"
    clone #2 -> #6
    clone #4 -> #7
    prepare_for_commit
    replace children of #0 with [#7]
    reset_after_commit
    "#);
    assert_ne!(r.host().children(container), before.as_slice());
    // the previous tree was never edited in place
    assert_eq!(r.host().render(before[0]), "<span>a</span><b></b>");
}
