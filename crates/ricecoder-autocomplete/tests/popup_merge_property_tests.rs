/// Property-based tests for popup merging and cache compatibility
///
/// **Feature: ricecoder-autocomplete, Popup merge invariants**
///
/// Properties:
/// - A source never contributes more candidates than its popup limit
/// - Popup candidates appear in non-increasing source priority
/// - A second popup pass over unchanged state emits nothing
/// - Extending the word under the cursor keeps a cached result compatible
use itertools::Itertools;
use proptest::prelude::*;
use ricecoder_autocomplete::*;

fn cache_entry(name: &str, ctx: &Context, start_column: usize, words: &[String]) -> CacheEntry {
    CacheEntry {
        start_column,
        matches: words.iter().map(|w| Candidate::new(w.clone(), name)).collect(),
        filtered_matches: Vec::new(),
        context: ctx.for_source(name, PluginOptions::named("prefix")),
        enable: true,
        refresh: false,
    }
}

/// Lowercase identifiers starting with `w`
fn word_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9_]{0,8}".prop_map(|tail| format!("w{}", tail))
}

proptest! {
    #[test]
    fn prop_popup_limit_respected(
        words in prop::collection::vec(word_strategy(), 0..60),
        limit in -1i64..20,
    ) {
        let ctx = Context::new(1, "w", "rust");
        let mut source = SourceDescriptor::new("buf", 5);
        source.popup_limit = Some(limit);
        let bundle = EventBundle::new(ctx.clone()).with_source(source);

        let mut cache = MatchCache::new();
        cache.insert("buf", cache_entry("buf", &ctx, 1, &words));

        let caps = CapabilityRegistry::with_builtins();
        let settings = EventSettings::default();
        let snapshot = MatchPipeline::new(&caps, &AllSources, &settings).assemble(&mut cache, &bundle);

        let expected = if limit < 0 { words.len() } else { words.len().min(limit as usize) };
        prop_assert_eq!(snapshot.matches.len(), expected);
    }

    #[test]
    fn prop_priority_order_is_non_increasing(
        priorities in prop::collection::vec(-10i64..100, 1..6),
    ) {
        let ctx = Context::new(1, "w", "rust");
        let mut bundle = EventBundle::new(ctx.clone());
        let mut cache = MatchCache::new();

        for (i, priority) in priorities.iter().enumerate() {
            let name = format!("src{}", i);
            bundle = bundle.with_source(SourceDescriptor::new(name.clone(), *priority));
            cache.insert(&name, cache_entry(&name, &ctx, 1, &[format!("w{}", i)]));
        }

        let caps = CapabilityRegistry::with_builtins();
        let settings = EventSettings::default();
        let snapshot = MatchPipeline::new(&caps, &AllSources, &settings).assemble(&mut cache, &bundle);

        prop_assert_eq!(snapshot.matches.len(), priorities.len());
        let shown: Vec<i64> = snapshot
            .matches
            .iter()
            .map(|m| {
                let meta: MatchMetadata = serde_json::from_str(&m.user_data).unwrap();
                bundle.sources[&meta.source].priority
            })
            .collect();
        prop_assert!(shown.iter().tuple_windows().all(|(a, b)| a >= b));
    }

    #[test]
    fn prop_second_popup_pass_is_suppressed(
        words in prop::collection::vec(word_strategy(), 0..20),
        tick in 0u64..1000,
    ) {
        let ctx = Context::new(1, "w", "rust").with_tick(tick);
        let bundle = EventBundle::new(ctx.clone()).with_source(SourceDescriptor::new("buf", 5));

        let mut cache = MatchCache::new();
        cache.insert("buf", cache_entry("buf", &ctx, 1, &words));

        let caps = CapabilityRegistry::with_builtins();
        let settings = EventSettings::default();
        let pipeline = MatchPipeline::new(&caps, &AllSources, &settings);
        let mut last = None;

        prop_assert!(pipeline.update_popup(&mut cache, &bundle, &mut last).is_some());
        prop_assert!(pipeline.update_popup(&mut cache, &bundle, &mut last).is_none());
    }

    #[test]
    fn prop_extending_word_stays_compatible(
        lead in "[a-z ]{0,6}",
        base in "[a-z][a-z0-9_]{0,5}",
        extension in "[a-z0-9_]{0,5}",
    ) {
        let patterns = WordPatternMatcher::new();
        let source = SourceDescriptor::new("buf", 5);

        let earlier = Context::new(1, format!("{} {}", lead, base), "rust");
        let later = Context::new(1, format!("{} {}{}", lead, base, extension), "rust");

        prop_assert!(patterns.is_compatible(&source, &earlier, &later, Some(1)).unwrap());

        let moved_on = Context::new(1, format!("{} {}{} x", lead, base, extension), "rust");
        prop_assert!(!patterns.is_compatible(&source, &earlier, &moved_on, Some(1)).unwrap());
    }
}
