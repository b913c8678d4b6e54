use dg_construction::{
    dg_ir::{BlockId, FunctionId, InstructionKind, Module, ModuleBuilder, Type, ValueId},
    compute_dg, BlockKey, ConstructionError, DepEdgeKind, DgConfig, DgConstructor, ExitKind,
    GraphId, NodeId, NodeKey, Pointer, PointsToFn, EXIT_EDGE_LABEL,
};
use itertools::Itertools;

fn dg(
    module: &Module,
    configure: impl FnOnce(&mut DgConstructor<'_>),
    tests: impl FnOnce(&mut DgConstructor<'_>, GraphId),
) {
    let _ = env_logger::try_init();
    let mut constructor = DgConstructor::new(module);
    configure(&mut constructor);
    let root = constructor.construct_root(None).unwrap();
    constructor.verify().unwrap();
    tests(&mut constructor, root)
}

fn call(
    m: &mut ModuleBuilder,
    block: BlockId,
    callee: FunctionId,
    args: Vec<ValueId>,
    ty: Type,
) -> ValueId {
    let callee = m.function_value(callee);
    m.push(block, InstructionKind::Call { callee, args }, ty)
}

fn ret(m: &mut ModuleBuilder, block: BlockId) -> ValueId {
    m.push(block, InstructionKind::Return { value: None }, Type::Void)
}

fn load(m: &mut ModuleBuilder, block: BlockId, address: ValueId) -> ValueId {
    m.push(block, InstructionKind::Load { address }, Type::int(32))
}

fn void_fn(m: &mut ModuleBuilder, name: &str) -> FunctionId {
    m.add_function(name, vec![], Type::Void, false)
}

fn node_of(dg: &DgConstructor<'_>, function: FunctionId, value: ValueId) -> NodeId {
    dg.graph_for(function)
        .and_then(|g| g.node_for(value))
        .unwrap_or_else(|| panic!("no node for {value}"))
}

fn subgraph_functions(dg: &DgConstructor<'_>, call: NodeId) -> Vec<FunctionId> {
    dg.registry()
        .node(call)
        .subgraphs()
        .iter()
        .map(|&g| dg.graph(g).function())
        .sorted()
        .collect()
}

#[test]
fn one_graph_per_function() {
    let mut m = ModuleBuilder::new("singleton");
    let a = void_fn(&mut m, "a");
    let b = void_fn(&mut m, "b");
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(a, "entry");
    ret(&mut m, bb);
    let bb = m.add_block(b, "entry");
    let b_calls_a = call(&mut m, bb, a, vec![], Type::Void);
    ret(&mut m, bb);
    let bb = m.add_block(main, "entry");
    let first = call(&mut m, bb, a, vec![], Type::Void);
    call(&mut m, bb, b, vec![], Type::Void);
    let second = call(&mut m, bb, a, vec![], Type::Void);
    ret(&mut m, bb);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, _| {
            let ga = dg.registry().lookup(a).unwrap();
            for (f, c) in [(main, first), (main, second), (b, b_calls_a)] {
                let node = node_of(dg, f, c);
                assert_eq!(
                    dg.registry().node(node).subgraphs().iter().copied().collect_vec(),
                    vec![ga]
                );
            }
            assert_eq!(dg.graph(ga).refcount(), 3);
            assert_eq!(dg.graph(ga).callers().len(), 3);
            assert_eq!(dg.registry().len(), 3);

            assert_eq!(dg.get_or_build(a), ga);
            assert_eq!(dg.get_or_build(a), ga);
            assert_eq!(dg.graph(ga).refcount(), 3);
        },
    );
}

#[test]
fn returns_share_one_exit() {
    let mut m = ModuleBuilder::new("returns");
    let f = m.add_function("f", vec![Type::int(1)], Type::Void, false);
    let cond = m.param(f, 0);
    let entry = m.add_block(f, "entry");
    let then = m.add_block(f, "then");
    let other = m.add_block(f, "else");
    m.push(
        entry,
        InstructionKind::CondBranch {
            condition: cond,
            if_true: then,
            if_false: other,
        },
        Type::Void,
    );
    let ret_then = ret(&mut m, then);
    let ret_else = ret(&mut m, other);
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(main, "entry");
    let c = m.add_constant(Type::int(1));
    call(&mut m, bb, f, vec![c], Type::Void);
    ret(&mut m, bb);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, _| {
            let graph = dg.graph_for(f).unwrap();
            let exit = graph.exit().unwrap();
            assert_eq!(
                dg.registry().node(exit).key(),
                NodeKey::Exit {
                    function: f,
                    kind: ExitKind::Return
                }
            );
            assert!(dg.registry().node(exit).is_artificial());
            for (block, r) in [(then, ret_then), (other, ret_else)] {
                let node = graph.node_for(r).unwrap();
                assert_eq!(
                    dg.registry()
                        .node(node)
                        .control_dependences()
                        .iter()
                        .filter(|&&n| n == exit)
                        .count(),
                    1
                );
                let exits = graph
                    .block(BlockKey::Block(block))
                    .unwrap()
                    .successors()
                    .iter()
                    .filter(|e| e.label == EXIT_EDGE_LABEL)
                    .collect_vec();
                assert_eq!(exits.len(), 1);
                assert_eq!(exits[0].target, BlockKey::Exit);
            }
            let exit_block = graph.exit_block().unwrap();
            assert_eq!(exit_block.nodes(), &[exit]);
            assert_eq!(exit_block.predecessors().len(), 2);

            let labels = graph
                .block(BlockKey::Block(entry))
                .unwrap()
                .successors()
                .iter()
                .map(|e| (e.target, e.label))
                .collect_vec();
            assert_eq!(
                labels,
                vec![(BlockKey::Block(then), 0), (BlockKey::Block(other), 1)]
            );
        },
    );
}

#[test]
fn function_without_return_gets_an_exit() {
    let mut m = ModuleBuilder::new("spin");
    let main = void_fn(&mut m, "main");
    let entry = m.add_block(main, "entry");
    let spin = m.add_block(main, "spin");
    let jump = m.push(entry, InstructionKind::Branch { target: spin }, Type::Void);
    m.push(spin, InstructionKind::Branch { target: spin }, Type::Void);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, root| {
            let graph = dg.graph(root);
            let entry_node = graph.entry().unwrap();
            let exit = graph.exit().unwrap();
            assert_eq!(
                dg.registry().node(exit).key(),
                NodeKey::Exit {
                    function: main,
                    kind: ExitKind::Unreachable
                }
            );
            assert_eq!(graph.exit_block().unwrap().nodes(), &[exit]);
            assert_eq!(
                dg.registry().node(entry_node).key(),
                NodeKey::Value(module.function(main).value)
            );
            assert!(dg
                .registry()
                .node(entry_node)
                .control_dependences()
                .contains(&graph.node_for(jump).unwrap()));

            // A self loop without a second successor decides nothing.
            let unit = graph.block(BlockKey::Block(spin)).unwrap();
            assert!(unit.has_self_loop());
            assert_eq!(unit.successors_num(), 1);
            assert!(unit.control_dependences().is_empty());
        },
    );
}

#[test]
fn looping_predicate_controls_itself() {
    let mut m = ModuleBuilder::new("self_loop");
    let main = m.add_function("main", vec![Type::int(1)], Type::Void, false);
    let cond = m.param(main, 0);
    let entry = m.add_block(main, "entry");
    let header = m.add_block(main, "header");
    let done = m.add_block(main, "done");
    m.push(entry, InstructionKind::Branch { target: header }, Type::Void);
    m.push(
        header,
        InstructionKind::CondBranch {
            condition: cond,
            if_true: header,
            if_false: done,
        },
        Type::Void,
    );
    ret(&mut m, done);
    let module = m.finish();

    dg(
        &module,
        |dg| {
            dg.with_config(DgConfig::default().with_control_scopes(false));
        },
        |dg, root| {
            let graph = dg.graph(root);
            let unit = graph.block(BlockKey::Block(header)).unwrap();
            assert!(unit.control_dependences().contains(&BlockKey::Block(header)));
            assert!(unit.rev_control_dependences().contains(&BlockKey::Block(header)));
            assert!(graph
                .block(BlockKey::Block(entry))
                .unwrap()
                .control_dependences()
                .is_empty());
        },
    );
}

#[test]
fn predicate_blocks_control_their_scope() {
    let mut m = ModuleBuilder::new("scopes");
    let main = m.add_function("main", vec![Type::int(1)], Type::Void, false);
    let cond = m.param(main, 0);
    let entry = m.add_block(main, "entry");
    let then = m.add_block(main, "then");
    let join = m.add_block(main, "join");
    m.push(
        entry,
        InstructionKind::CondBranch {
            condition: cond,
            if_true: then,
            if_false: join,
        },
        Type::Void,
    );
    m.push(then, InstructionKind::Branch { target: join }, Type::Void);
    ret(&mut m, join);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, root| {
            let graph = dg.graph(root);
            let controlled = graph
                .block(BlockKey::Block(entry))
                .unwrap()
                .control_dependences()
                .iter()
                .copied()
                .collect_vec();
            assert_eq!(controlled, vec![BlockKey::Block(then)]);
        },
    );
}

#[test]
fn phi_depends_on_incoming_blocks() {
    let mut m = ModuleBuilder::new("phi");
    let main = m.add_function("main", vec![Type::int(1)], Type::Void, false);
    let cond = m.param(main, 0);
    let entry = m.add_block(main, "entry");
    let left = m.add_block(main, "left");
    let join = m.add_block(main, "join");
    let lp = m.add_block(main, "loop");
    let done = m.add_block(main, "done");
    let branch = m.push(
        entry,
        InstructionKind::CondBranch {
            condition: cond,
            if_true: left,
            if_false: join,
        },
        Type::Void,
    );
    let jump = m.push(left, InstructionKind::Branch { target: join }, Type::Void);
    let one = m.add_constant(Type::int(32));
    let two = m.add_constant(Type::int(32));
    let merge = m.push(
        join,
        InstructionKind::Phi {
            incoming: vec![(one, entry), (two, left)],
        },
        Type::int(32),
    );
    let into_loop = m.push(join, InstructionKind::Branch { target: lp }, Type::Void);
    let counter = m.push(lp, InstructionKind::Phi { incoming: vec![] }, Type::int(32));
    m.add_phi_incoming(counter, merge, join);
    m.add_phi_incoming(counter, counter, lp);
    let back = m.push(
        lp,
        InstructionKind::CondBranch {
            condition: cond,
            if_true: lp,
            if_false: done,
        },
        Type::Void,
    );
    ret(&mut m, done);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, _| {
            let control = |v| dg.registry().node(node_of(dg, main, v)).control_dependences();
            let merge_node = node_of(dg, main, merge);
            let counter_node = node_of(dg, main, counter);
            assert!(control(branch).contains(&merge_node));
            assert!(control(jump).contains(&merge_node));
            assert!(control(into_loop).contains(&counter_node));
            assert!(!control(back).contains(&counter_node));
        },
    );
}

#[test]
fn repeated_global_access_adds_one_formal() {
    let mut m = ModuleBuilder::new("idempotent");
    let g = m.add_global("g", Type::ptr());
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(main, "entry");
    let x = load(&mut m, bb, g);
    load(&mut m, bb, g);
    m.push(bb, InstructionKind::Store { value: x, address: g }, Type::Void);
    ret(&mut m, bb);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, root| {
            let params = dg.graph(root).parameters();
            assert_eq!(params.len(), 1);
            assert_eq!(params.globals().keys().copied().collect_vec(), vec![g]);
            let formal = params.find_global(g).unwrap();
            let entry = dg.graph(root).entry().unwrap();
            let controlled = dg.registry().node(entry).control_dependences();
            assert!(controlled.contains(&formal.input) && controlled.contains(&formal.output));
        },
    );
}

#[test]
fn callee_global_becomes_parameter_and_actual() {
    let mut m = ModuleBuilder::new("foo");
    let g = m.add_global("g", Type::ptr());
    let foo = m.add_function("foo", vec![Type::int(32)], Type::Void, false);
    let bb = m.add_block(foo, "entry");
    load(&mut m, bb, g);
    ret(&mut m, bb);
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(main, "entry");
    let x = m.add_constant(Type::int(32));
    let c = call(&mut m, bb, foo, vec![x], Type::Void);
    ret(&mut m, bb);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, _| {
            let foo_graph = dg.graph_for(foo).unwrap();
            let formal_g = *foo_graph.parameters().find_global(g).unwrap();
            let arg = module.function(foo).params[0];
            let formal_x = *foo_graph.parameters().find(arg).unwrap();

            let call_node = dg.registry().node(node_of(dg, main, c));
            let actuals = call_node.parameters().unwrap();
            let actual_g = actuals.find_global(g).unwrap();
            assert!(actuals.find(arg).is_none());
            let actual_x = actuals.find(x).unwrap();
            assert_eq!(dg.registry().node(actual_x.input).key(), NodeKey::Value(x));
            for (actual, formal) in [(actual_g, formal_g), (actual_x, formal_x)] {
                assert!(dg
                    .registry()
                    .node(actual.input)
                    .data_dependences()
                    .contains(&formal.input));
                assert!(dg
                    .registry()
                    .node(formal.output)
                    .data_dependences()
                    .contains(&actual.output));
                assert!(call_node.control_dependences().contains(&actual.input));
            }
            assert!(call_node
                .control_dependences()
                .contains(&foo_graph.entry().unwrap()));
            assert!(dg.graph_for(main).unwrap().parameters().find_global(g).is_some());
        },
    );
}

#[test]
fn globals_propagate_up_the_call_chain() {
    let mut m = ModuleBuilder::new("chain");
    let g = m.add_global("g", Type::ptr());
    let c = void_fn(&mut m, "c");
    let b = void_fn(&mut m, "b");
    let a = void_fn(&mut m, "a");
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(c, "entry");
    load(&mut m, bb, g);
    ret(&mut m, bb);
    let bb = m.add_block(b, "entry");
    call(&mut m, bb, c, vec![], Type::Void);
    ret(&mut m, bb);
    let bb = m.add_block(a, "entry");
    let a_calls_b = call(&mut m, bb, b, vec![], Type::Void);
    ret(&mut m, bb);
    let bb = m.add_block(main, "entry");
    let main_calls_a = call(&mut m, bb, a, vec![], Type::Void);
    ret(&mut m, bb);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, _| {
            for f in [c, b, a, main] {
                assert!(
                    dg.graph_for(f).unwrap().parameters().find_global(g).is_some(),
                    "{} misses g",
                    module.function(f).name
                );
            }
            for (f, call) in [(a, a_calls_b), (main, main_calls_a)] {
                let node = dg.registry().node(node_of(dg, f, call));
                assert!(node.parameters().unwrap().find_global(g).is_some());
            }
        },
    );
}

#[test]
fn late_global_reaches_recursive_call_site() {
    let mut m = ModuleBuilder::new("late");
    let g = m.add_global("g", Type::ptr());
    let f = void_fn(&mut m, "f");
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(f, "entry");
    let again = call(&mut m, bb, f, vec![], Type::Void);
    load(&mut m, bb, g);
    ret(&mut m, bb);
    let bb = m.add_block(main, "entry");
    call(&mut m, bb, f, vec![], Type::Void);
    ret(&mut m, bb);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, _| {
            let graph = dg.graph_for(f).unwrap();
            let formal = graph.parameters().find_global(g).unwrap();
            let node = dg.registry().node(node_of(dg, f, again));
            let actual = node.parameters().unwrap().find_global(g).unwrap();
            assert!(dg
                .registry()
                .node(actual.input)
                .data_dependences()
                .contains(&formal.input));
        },
    );
}

#[test]
fn self_recursion_terminates_and_tears_down() {
    let mut m = ModuleBuilder::new("recursive");
    let f = void_fn(&mut m, "f");
    let bb = m.add_block(f, "entry");
    let again = call(&mut m, bb, f, vec![], Type::Void);
    ret(&mut m, bb);
    let module = m.finish();

    let _ = env_logger::try_init();
    let mut dg = DgConstructor::new(&module);
    let root = dg.construct_root(Some("f")).unwrap();
    dg.verify().unwrap();
    assert_eq!(dg.get_or_build(f), root);
    let node = node_of(&dg, f, again);
    assert_eq!(
        dg.registry().node(node).subgraphs().iter().copied().collect_vec(),
        vec![root]
    );
    assert_eq!(dg.graph(root).refcount(), 2);

    dg.registry_mut().destroy(root);
    assert!(dg.registry().try_graph(root).is_none());
    assert!(dg.registry().is_empty());
    assert_eq!(dg.registry().node_count(), 0);
}

#[test]
fn mutual_recursion_builds_each_function_once() {
    let mut m = ModuleBuilder::new("mutual");
    let g = m.add_global("g", Type::ptr());
    let even = void_fn(&mut m, "even");
    let odd = void_fn(&mut m, "odd");
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(even, "entry");
    call(&mut m, bb, odd, vec![], Type::Void);
    ret(&mut m, bb);
    let bb = m.add_block(odd, "entry");
    call(&mut m, bb, even, vec![], Type::Void);
    load(&mut m, bb, g);
    ret(&mut m, bb);
    let bb = m.add_block(main, "entry");
    call(&mut m, bb, even, vec![], Type::Void);
    ret(&mut m, bb);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, root| {
            assert_eq!(dg.registry().len(), 3);
            for f in [even, odd, main] {
                assert!(dg.graph_for(f).unwrap().parameters().find_global(g).is_some());
            }
            dg.registry_mut().destroy(root);
            assert!(dg.registry().lookup(main).is_none());
        },
    );
}

#[test]
fn indirect_call_links_every_compatible_target() {
    let mut m = ModuleBuilder::new("indirect");
    let table = m.add_global("table", Type::ptr());
    let target = |m: &mut ModuleBuilder, name: &str, param: Type, defined: bool| {
        let f = m.add_function(name, vec![param], Type::Void, false);
        if defined {
            let bb = m.add_block(f, "entry");
            ret(m, bb);
        }
        f
    };
    let g1 = target(&mut m, "g1", Type::int(32), true);
    let g2 = target(&mut m, "g2", Type::int(32), true);
    let wrong = target(&mut m, "wrong", Type::ptr(), true);
    let ext = target(&mut m, "ext", Type::int(32), false);
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(main, "entry");
    let fp = m.push(bb, InstructionKind::Load { address: table }, Type::ptr());
    let x = m.add_constant(Type::int(32));
    let c = m.push(
        bb,
        InstructionKind::Call {
            callee: fp,
            args: vec![x],
        },
        Type::Void,
    );
    ret(&mut m, bb);
    let module = m.finish();

    let values = [g1, g2, wrong, ext].map(|f| module.function(f).value);
    dg(
        &module,
        |dg| {
            dg.with_points_to(PointsToFn::new(move |_, v| {
                if v != fp {
                    return vec![];
                }
                let mut pointers = values.iter().copied().map(Pointer::new).collect_vec();
                pointers.push(Pointer::invalid(table));
                pointers
            }));
        },
        |dg, root| {
            let node = node_of(dg, main, c);
            assert_eq!(subgraph_functions(dg, node), vec![g1, g2]);
            assert!(dg.registry().lookup(wrong).is_none());
            assert!(dg.registry().lookup(ext).is_none());
            assert!(dg.graph(root).call_nodes().contains(&node));
            let unit = dg.graph(root).block(BlockKey::Block(bb)).unwrap();
            assert!(unit.call_sites().contains(&node));

            // Both candidates read the operand through one shared actual pair.
            let actuals = dg.registry().node(node).parameters().unwrap();
            assert_eq!(actuals.params().keys().copied().collect_vec(), vec![x]);
            let actual = *actuals.find(x).unwrap();
            assert_eq!(dg.registry().node(actual.input).key(), NodeKey::Value(x));
            for f in [g1, g2] {
                let param = module.function(f).params[0];
                let formal = *dg.graph_for(f).unwrap().parameters().find(param).unwrap();
                assert!(dg
                    .registry()
                    .node(actual.input)
                    .data_dependences()
                    .contains(&formal.input));
                assert!(dg
                    .registry()
                    .node(formal.output)
                    .data_dependences()
                    .contains(&actual.output));
            }
        },
    );
}

#[test]
fn indirect_call_without_oracle_stays_unlinked() {
    let mut m = ModuleBuilder::new("unresolved");
    let table = m.add_global("table", Type::ptr());
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(main, "entry");
    let fp = m.push(bb, InstructionKind::Load { address: table }, Type::ptr());
    let c = m.push(
        bb,
        InstructionKind::Call {
            callee: fp,
            args: vec![],
        },
        Type::Void,
    );
    ret(&mut m, bb);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, root| {
            let node = node_of(dg, main, c);
            assert!(!dg.registry().node(node).has_subgraphs());
            assert!(dg.graph(root).call_nodes().contains(&node));
            assert!(dg.graph(root).block(BlockKey::Block(bb)).unwrap().call_sites().is_empty());
        },
    );
}

#[test]
#[should_panic(expected = "INVARIANT VIOLATED")]
fn alias_of_non_function_as_call_target_is_fatal() {
    let mut m = ModuleBuilder::new("bad_alias");
    let data = m.add_global("data", Type::ptr());
    let alias = m.add_alias("data_alias", data);
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(main, "entry");
    let fp = m.push(bb, InstructionKind::Load { address: data }, Type::ptr());
    m.push(
        bb,
        InstructionKind::Call {
            callee: fp,
            args: vec![],
        },
        Type::Void,
    );
    ret(&mut m, bb);
    let module = m.finish();

    let mut dg = DgConstructor::new(&module);
    dg.with_points_to(PointsToFn::new(move |_, _| vec![Pointer::new(alias)]));
    let _ = dg.construct_root(None);
}

#[test]
fn variadic_arguments_bind_to_vararg() {
    let mut m = ModuleBuilder::new("varargs");
    let logf = m.add_function("logf", vec![Type::ptr()], Type::Void, true);
    let bb = m.add_block(logf, "entry");
    ret(&mut m, bb);
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(main, "entry");
    let fmt = m.add_constant(Type::ptr());
    let x = m.add_constant(Type::int(32));
    let y = m.add_constant(Type::int(64));
    let c = call(&mut m, bb, logf, vec![fmt, x, y], Type::Void);
    ret(&mut m, bb);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, _| {
            let graph = dg.graph_for(logf).unwrap();
            let vararg = graph.parameters().vararg().unwrap();
            let registry = dg.registry();
            assert_eq!(registry.node(vararg.input).key(), NodeKey::VarArg(logf));
            assert!(registry
                .node(vararg.input)
                .data_dependences()
                .contains(&vararg.output));

            let actuals = registry.node(node_of(dg, main, c)).parameters().unwrap();
            assert!(actuals.find(fmt).is_some());
            for extra in [x, y] {
                let actual = actuals.find(extra).unwrap();
                assert!(registry
                    .node(actual.input)
                    .data_dependences()
                    .contains(&vararg.input));
            }
        },
    );
}

#[test]
fn allocations_become_heap_parameters() {
    let mut m = ModuleBuilder::new("heap");
    let malloc = m.add_function("malloc", vec![Type::int(64)], Type::ptr(), false);
    let make = m.add_function("make", vec![], Type::ptr(), false);
    let main = void_fn(&mut m, "main");
    let size = m.add_constant(Type::int(64));
    let bb = m.add_block(make, "entry");
    let object = call(&mut m, bb, malloc, vec![size], Type::ptr());
    m.push(bb, InstructionKind::Return { value: Some(object) }, Type::Void);
    let bb = m.add_block(main, "entry");
    let made = call(&mut m, bb, make, vec![], Type::ptr());
    let direct = call(&mut m, bb, malloc, vec![size], Type::ptr());
    ret(&mut m, bb);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, root| {
            assert!(dg.graph_for(make).unwrap().parameters().find(object).is_some());
            let params = dg.graph(root).parameters();
            assert!(params.find(object).is_some());
            assert!(params.find(direct).is_some());
            assert!(params.globals().is_empty());
            let call_node = dg.registry().node(node_of(dg, main, made));
            assert!(call_node.parameters().unwrap().find(object).is_some());
            assert!(dg.registry().lookup(malloc).is_none());
        },
    );
}

#[test]
fn call_sites_are_found_by_callee_name() {
    let mut m = ModuleBuilder::new("sites");
    let lock = void_fn(&mut m, "lock");
    let work = void_fn(&mut m, "work");
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(work, "entry");
    let inner = call(&mut m, bb, lock, vec![], Type::Void);
    ret(&mut m, bb);
    let bb = m.add_block(main, "entry");
    let first = call(&mut m, bb, lock, vec![], Type::Void);
    let to_work = call(&mut m, bb, work, vec![], Type::Void);
    let second = call(&mut m, bb, lock, vec![], Type::Void);
    ret(&mut m, bb);
    let module = m.finish();

    dg(
        &module,
        |dg| {
            dg.with_config(DgConfig::default().with_gather_callsites(Some("lock")));
        },
        |dg, _| {
            let locks = [(work, inner), (main, first), (main, second)]
                .map(|(f, v)| node_of(dg, f, v))
                .into_iter()
                .sorted()
                .collect_vec();
            assert_eq!(
                dg.gathered_call_sites().iter().copied().sorted().collect_vec(),
                locks
            );
            assert_eq!(
                dg.call_sites(&["lock"]).into_iter().sorted().collect_vec(),
                locks
            );
            assert_eq!(
                dg.call_sites(&["work"]).into_iter().collect_vec(),
                vec![node_of(dg, main, to_work)]
            );
            assert!(dg.call_sites(&["unlock"]).is_empty());
        },
    );
}

#[test]
fn releasing_the_root_frees_everything_but_globals() {
    let mut m = ModuleBuilder::new("release");
    let g = m.add_global("g", Type::ptr());
    let foo = void_fn(&mut m, "foo");
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(foo, "entry");
    load(&mut m, bb, g);
    ret(&mut m, bb);
    let bb = m.add_block(main, "entry");
    call(&mut m, bb, foo, vec![], Type::Void);
    ret(&mut m, bb);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, root| {
            assert!(dg.registry().global_node(g).is_some());
            dg.registry_mut().release(root);
            assert!(dg.registry().is_empty());
            assert_eq!(dg.registry().node_count(), 1);
        },
    );
}

#[test]
fn export_contains_every_live_node() {
    let mut m = ModuleBuilder::new("export");
    let foo = void_fn(&mut m, "foo");
    let main = void_fn(&mut m, "main");
    let bb = m.add_block(foo, "entry");
    ret(&mut m, bb);
    let bb = m.add_block(main, "entry");
    let c = call(&mut m, bb, foo, vec![], Type::Void);
    ret(&mut m, bb);
    let module = m.finish();

    dg(
        &module,
        |_| (),
        |dg, _| {
            let exported = dg.to_petgraph();
            assert_eq!(exported.graph.node_count(), dg.registry().node_count());
            let from = exported.find(node_of(dg, main, c)).unwrap();
            let to = exported
                .find(dg.graph_for(foo).unwrap().entry().unwrap())
                .unwrap();
            assert!(exported
                .graph
                .edges_connecting(from, to)
                .any(|e| e.weight().kind == DepEdgeKind::Control));

            let path = std::env::temp_dir().join("dg_export_test.dot");
            exported.generate_graphviz(&path).unwrap();
            let dot = std::fs::read_to_string(&path).unwrap();
            assert!(dot.starts_with("digraph"));
        },
    );
}

#[test]
fn missing_entry_is_reported() {
    let mut m = ModuleBuilder::new("no_main");
    let start = void_fn(&mut m, "start");
    let bb = m.add_block(start, "entry");
    ret(&mut m, bb);
    void_fn(&mut m, "ext");
    let module = m.finish();

    assert_eq!(
        compute_dg(&module, None).err(),
        Some(ConstructionError::NoEntryFunction("main".to_owned()))
    );
    let mut dg = DgConstructor::new(&module);
    assert_eq!(
        dg.construct_root(Some("ext")),
        Err(ConstructionError::Declaration("ext".to_owned()))
    );
    assert!(dg.registry().is_empty());
    assert!(compute_dg(&module, Some("start")).is_ok());

    dg.with_config(DgConfig::default().with_entry("start"));
    let root = dg.construct_root(None).unwrap();
    assert_eq!(dg.construct_root(Some("start")), Ok(root));
    assert_eq!(dg.graph(root).refcount(), 2);
}

fn switch_with_targets(targets: usize) -> Module {
    let mut m = ModuleBuilder::new("fan_out");
    let main = void_fn(&mut m, "main");
    let entry = m.add_block(main, "entry");
    let target = m.add_block(main, "target");
    let condition = m.add_constant(Type::int(32));
    m.push(
        entry,
        InstructionKind::Switch {
            condition,
            default: target,
            cases: vec![target; targets - 1],
        },
        Type::Void,
    );
    m.push(target, InstructionKind::Unreachable, Type::Void);
    m.finish()
}

#[test]
fn block_with_255_successors_is_built() {
    let module = switch_with_targets(255);
    dg(
        &module,
        |_| (),
        |dg, root| {
            let entry = dg.graph(root).entry_block().unwrap();
            let labels = entry.successors().iter().map(|e| e.label).collect_vec();
            assert_eq!(labels, (0..=254u8).collect_vec());
        },
    );
}

#[test]
#[should_panic(expected = "INVARIANT VIOLATED")]
fn block_with_256_successors_is_fatal() {
    let module = switch_with_targets(256);
    let _ = compute_dg(&module, None);
}
