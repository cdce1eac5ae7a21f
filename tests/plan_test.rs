use pretty_assertions::assert_eq;
use qconv::conv::interior;
use qconv::{AlgorithmPlan, CacheSizes, ConvConfig, ConvShape, ElemKind, PadPolicy, PassState, PlanOptions};

const F: usize = 8;
const SPAN: usize = 5;

fn shape(cfg: ConvConfig) -> ConvShape {
    ConvShape::new(&cfg).unwrap()
}

fn small_caches() -> CacheSizes {
    CacheSizes {
        l1: 4096,
        l2: 16384,
        l3: 65536,
    }
}

#[test]
fn default_caches_fit_whole_layer() {
    let s = shape(ConvConfig::new(1, 64, 32, 32, 64, 3).pad(1));
    let plan = AlgorithmPlan::new(&s, F, SPAN, &PlanOptions::default());
    assert_eq!(
        plan,
        AlgorithmPlan {
            width: 8,
            micro_d: 16,
            macro_c: 64,
            macro_h: 32,
            macro_d: 64,
            max_span: 5,
            pad_source: true,
            parallel: false,
        }
    );
    assert_eq!(plan.passes(64), 1);
}

#[test]
fn small_caches_split_channels_and_rows() {
    let s = shape(ConvConfig::new(1, 64, 32, 32, 64, 3).pad(1));
    let options = PlanOptions::default().cache(small_caches());
    let plan = AlgorithmPlan::new(&s, F, SPAN, &options);
    // L1: 4096 / (9 * 16) = 28 channels, already a multiple of 4.
    assert_eq!(plan.macro_c, 28);
    // L2: 16384 / (28 * 32) = 18 source rows -> 16 output rows.
    assert_eq!(plan.macro_h, 16);
    assert_eq!(plan.macro_d, 64);
    assert_eq!(plan.passes(64), 3);
    // Bands do not cover the full height, so borders stay in place.
    assert!(!plan.pad_source);
}

#[test]
fn l3_bounds_output_macro_tile() {
    let s = shape(ConvConfig::new(1, 64, 32, 32, 64, 3));
    let cache = CacheSizes { l3: 8192, ..small_caches() };
    let plan = AlgorithmPlan::new(&s, F, SPAN, &PlanOptions::default().cache(cache));
    // 8192 / (9 * 28) = 32, aligned to micro_d.
    assert_eq!(plan.macro_d, 32);

    let cache = CacheSizes { l3: 1024, ..small_caches() };
    let plan = AlgorithmPlan::new(&s, F, SPAN, &PlanOptions::default().cache(cache));
    assert_eq!(plan.macro_d, 16);
}

#[test]
fn macro_c_has_floor_of_four() {
    let cache = CacheSizes { l1: 64, ..CacheSizes::default() };
    let wide = shape(ConvConfig::new(1, 32, 8, 8, 16, 3));
    assert_eq!(AlgorithmPlan::new(&wide, F, SPAN, &PlanOptions::default().cache(cache)).macro_c, 4);
    let narrow = shape(ConvConfig::new(1, 3, 8, 8, 16, 3));
    assert_eq!(AlgorithmPlan::new(&narrow, F, SPAN, &PlanOptions::default().cache(cache)).macro_c, 3);
}

#[test]
fn overrides_are_clamped() {
    let s = shape(ConvConfig::new(1, 20, 10, 10, 40, 3));
    let plan = AlgorithmPlan::new(&s, F, SPAN, &PlanOptions::default().macro_c(7).macro_h(3).macro_d(20));
    assert_eq!((plan.macro_c, plan.macro_h, plan.macro_d), (7, 3, 32));
    assert_eq!(plan.passes(20), 3);

    let plan = AlgorithmPlan::new(&s, F, SPAN, &PlanOptions::default().macro_c(100).macro_h(100).macro_d(100));
    assert_eq!((plan.macro_c, plan.macro_h, plan.macro_d), (20, 8, 48));
}

#[test]
fn padding_policy() {
    let padded = shape(ConvConfig::new(1, 64, 32, 32, 64, 3).pad(1));
    let unpadded = shape(ConvConfig::new(1, 64, 32, 32, 64, 3));
    let opts = |p| PlanOptions::default().padding(p);
    assert!(AlgorithmPlan::new(&padded, F, SPAN, &opts(PadPolicy::Always)).pad_source);
    assert!(!AlgorithmPlan::new(&padded, F, SPAN, &opts(PadPolicy::Never)).pad_source);
    assert!(!AlgorithmPlan::new(&unpadded, F, SPAN, &opts(PadPolicy::Always)).pad_source);
    assert!(!AlgorithmPlan::new(&unpadded, F, SPAN, &opts(PadPolicy::Auto)).pad_source);
}

#[test]
fn cheap_borders_stay_in_place() {
    // 1x3 kernel on a wide image: only two border columns, the copy costs more.
    let s = shape(ConvConfig {
        kernel: [1, 3],
        pad: [0, 1, 0, 1],
        ..ConvConfig::new(1, 4, 64, 64, 16, 1)
    });
    assert!(!AlgorithmPlan::new(&s, F, SPAN, &PlanOptions::default()).pad_source);
}

#[test]
fn interior_ranges() {
    assert_eq!(interior(4, 4, 3, 1, 1, 1), (1, 3));
    assert_eq!(interior(3, 5, 3, 2, 1, 1), (1, 2));
    assert_eq!(interior(6, 6, 1, 1, 1, 0), (0, 6));
    assert_eq!(interior(8, 8, 3, 1, 2, 2), (2, 6));
    // kernel wider than the unpadded source: nothing is interior
    assert_eq!(interior(2, 2, 3, 1, 1, 1), (1, 1));
}

#[test]
fn pass_state_selection() {
    assert_eq!(PassState::select(0, 1, ElemKind::U8), PassState::Single8u);
    assert_eq!(PassState::select(0, 1, ElemKind::F32), PassState::Single32f);
    assert_eq!(PassState::select(0, 3, ElemKind::U8), PassState::First);
    assert_eq!(PassState::select(1, 3, ElemKind::F32), PassState::Interim);
    assert_eq!(PassState::select(2, 3, ElemKind::U8), PassState::Last8u);
    assert_eq!(PassState::select(1, 2, ElemKind::F32), PassState::Last32f);

    let loads: Vec<bool> = PassState::ALL.iter().map(|p| p.loads_partial()).collect();
    let finals: Vec<bool> = PassState::ALL.iter().map(|p| p.is_final()).collect();
    assert_eq!(loads, vec![false, false, false, true, true, true]);
    assert_eq!(finals, vec![true, true, false, false, true, true]);
}

#[test]
fn plan_options_from_json() {
    let opts: PlanOptions = serde_json::from_str(r#"{"padding": "never", "macro_c": 8, "parallel": true}"#).unwrap();
    assert_eq!(opts.padding, PadPolicy::Never);
    assert_eq!(opts.macro_c, Some(8));
    assert_eq!(opts.macro_h, None);
    assert!(opts.parallel);
    assert_eq!(opts.cache, CacheSizes::default());

    let cache: CacheSizes = serde_json::from_str(r#"{"l1": 49152, "l2": 1310720, "l3": 8388608}"#).unwrap();
    assert_eq!(cache.l1, 48 * 1024);
}
