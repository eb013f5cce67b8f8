mod workloads {
    use std::collections::HashMap;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use rand::seq::SliceRandom;
    use rand::{rng, Rng};

    use crate::{
        BitwiseKeyEqual, BucketStorage, DefaultKeyEqual, Device, DoubleHashing, EmptyKey,
        ErasedKey, Hash, IdentityHash, LinearProbing, Operator, StaticMultiset, Stream,
        ThreadScope, XxHash32, XxHash64,
    };

    type Bucketed<const N: usize> =
        StaticMultiset<u32, DefaultKeyEqual, LinearProbing<XxHash32>, BucketStorage<N>>;

    fn stream() -> Stream {
        let device = Device::builder().num_workers(8).build().unwrap();
        Stream::new(&device).unwrap()
    }

    fn histogram(keys: &[u64]) -> HashMap<u64, usize> {
        let mut histogram = HashMap::new();
        for k in keys {
            *histogram.entry(*k).or_insert(0) += 1;
        }
        histogram
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn high_multiplicity() {
        let stream = stream();
        let workload_size = 1 << 16;
        let mut keys: Vec<u64> = (0..workload_size).map(|k| k % 97).collect();
        keys.shuffle(&mut rng());
        let multiset: StaticMultiset<u64> = StaticMultiset::with_load_factor(
            keys.len(),
            0.5,
            EmptyKey(u64::MAX),
            DefaultKeyEqual,
            DoubleHashing::default(),
            ThreadScope::Device,
            &stream,
        )
        .unwrap();
        multiset.insert(&keys, &stream).unwrap();
        assert_eq!(multiset.size(&stream), Ok(keys.len()));

        let expected = histogram(&keys);
        for (key, count) in &expected {
            assert_eq!(multiset.count(&[*key], &stream), Ok(*count));
        }
        let distinct: Vec<u64> = expected.keys().copied().collect();
        assert_eq!(multiset.count(&distinct, &stream), Ok(keys.len()));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn bucketed_layouts() {
        fn run<const N: usize>(stream: &Stream) {
            let multiset: Bucketed<N> = StaticMultiset::with_parts(
                1000,
                EmptyKey(u32::MAX),
                DefaultKeyEqual,
                LinearProbing::new(XxHash32::new(17)),
                ThreadScope::Device,
                stream,
            )
            .unwrap();
            assert_eq!(multiset.capacity() % N, 0);
            assert_eq!(multiset.storage_ref().bucket_size(), N);
            let keys: Vec<u32> = (0..900).map(|k| k / 3).collect();
            multiset.insert(&keys, stream).unwrap();
            assert_eq!(multiset.count(&[0, 1, 299, 300], stream), Ok(9));
            assert_eq!(multiset.size(stream), Ok(900));
        }
        let stream = stream();
        run::<1>(&stream);
        run::<2>(&stream);
        run::<4>(&stream);
        run::<8>(&stream);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn fill_to_capacity() {
        let stream = stream();
        let multiset: StaticMultiset<u16> =
            StaticMultiset::new(1000, EmptyKey(u16::MAX), &stream).unwrap();
        let capacity = multiset.capacity();
        let keys: Vec<u16> = (0..capacity).map(|k| (k % 5) as u16).collect();
        multiset.insert(&keys, &stream).unwrap();
        assert_eq!(multiset.size(&stream), Ok(capacity));
        assert_eq!(multiset.count(&[0, 1, 2, 3, 4], &stream), Ok(capacity));
        let mut found = [true];
        multiset.contains(&[9], &mut found, &stream).unwrap();
        assert_eq!(found, [false]);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn signed_and_float_keys() {
        let stream = stream();
        let signed: StaticMultiset<i8, DefaultKeyEqual, LinearProbing<IdentityHash>> =
            StaticMultiset::with_parts(
                300,
                EmptyKey(i8::MIN),
                DefaultKeyEqual,
                LinearProbing::new(IdentityHash),
                ThreadScope::System,
                &stream,
            )
            .unwrap();
        let keys: Vec<i8> = (-127..=127).collect();
        signed.insert(&keys, &stream).unwrap();
        assert_eq!(signed.count(&keys, &stream), Ok(keys.len()));

        let floats: StaticMultiset<f64, BitwiseKeyEqual> = StaticMultiset::with_erased_key(
            64,
            EmptyKey(f64::NAN),
            ErasedKey(f64::INFINITY),
            BitwiseKeyEqual,
            DoubleHashing::default(),
            ThreadScope::Block,
            &stream,
        )
        .unwrap();
        floats.insert(&[0.0, -0.0, 0.0, 1.25], &stream).unwrap();
        assert_eq!(floats.count(&[0.0], &stream), Ok(2));
        assert_eq!(floats.count(&[-0.0], &stream), Ok(1));
        floats.erase(&[0.0], &stream).unwrap();
        assert_eq!(floats.count(&[0.0, -0.0, 1.25], &stream), Ok(3));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn racing_references() {
        let stream = stream();
        let multiset: StaticMultiset<u64> = StaticMultiset::with_erased_key(
            8192,
            EmptyKey(u64::MAX),
            ErasedKey(u64::MAX - 1),
            DefaultKeyEqual,
            DoubleHashing::default(),
            ThreadScope::System,
            &stream,
        )
        .unwrap();
        stream.synchronize().unwrap();
        let num_threads = 8;
        let workload_size = 512_u64;
        let barrier = Arc::new(Barrier::new(num_threads));
        let r = multiset
            .device_ref([Operator::Insert, Operator::Erase, Operator::Count])
            .unwrap();
        thread::scope(|s| {
            for _ in 0..num_threads {
                let barrier = barrier.clone();
                let r = r.clone();
                s.spawn(move || {
                    barrier.wait();
                    for k in 0..workload_size {
                        assert!(r.insert(k));
                    }
                    for k in (0..workload_size).filter(|k| k % 2 == 0) {
                        assert!(r.erase(&k));
                    }
                });
            }
        });
        for k in 0..workload_size {
            let expected = if k % 2 == 0 { 0 } else { num_threads };
            assert_eq!(r.count(&k), expected);
        }
        assert_eq!(
            multiset.size(&stream),
            Ok(num_threads * workload_size as usize / 2)
        );
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn query_side_hashing() {
        #[derive(Clone)]
        struct SameHash;

        impl Hash<u64> for SameHash {
            fn hash(&self, key: &u64) -> u64 {
                Hash::<u64>::hash(&XxHash64::new(0), key)
            }
        }

        let stream = stream();
        let multiset: StaticMultiset<u64> = StaticMultiset::new(256, EmptyKey(0), &stream).unwrap();
        let keys: Vec<u64> = (1..=64).map(|_| rng().random_range(1..16)).collect();
        multiset.insert(&keys, &stream).unwrap();
        let (_, second) = multiset.probing_scheme().hash_function();
        assert_eq!(
            multiset.count_with(&keys, DefaultKeyEqual, (SameHash, second), &stream),
            multiset.count(&keys, &stream)
        );
    }
}
