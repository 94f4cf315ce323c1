use divan::AllocProfiler;

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

pub mod read {
    use divan::Bencher;
    use lumpkit_archive::{Archive, Entry, OpenOptions};

    /// A full archive: 2048 entries of 512 bytes each
    pub fn get_input() -> Vec<u8> {
        let mut archive = Archive::create_format("chasm_bin").unwrap();
        {
            let mut bulk = archive.bulk_update();
            for i in 0..2048u32 {
                let data = (0..512).map(|b| (b as u8) ^ (i as u8)).collect::<Vec<_>>();
                bulk.add_entry("", Entry::new(format!("E{i:04}.CEL"), data))
                    .unwrap();
            }
        }
        let codec = archive.codec().clone();
        archive.export(codec.as_ref()).unwrap().data
    }

    #[divan::bench]
    fn open(bencher: Bencher) {
        bencher.with_inputs(get_input).bench_values(|data| {
            divan::black_box(Archive::open_bytes(data, &OpenOptions::default()).unwrap());
        });
    }

    #[divan::bench]
    fn open_loaded(bencher: Bencher) {
        let options = OpenOptions::builder().load_data(true).build();
        bencher.with_inputs(get_input).bench_values(|data| {
            divan::black_box(Archive::open_bytes(data, &options).unwrap());
        });
    }

    #[divan::bench]
    fn access_entry(bencher: Bencher) {
        bencher
            .with_inputs(|| Archive::open_bytes(get_input(), &OpenOptions::default()).unwrap())
            .bench_refs(|archive| {
                divan::black_box(archive.entry_data("E1024.CEL").unwrap().len());
            });
    }

    #[divan::bench(sample_count = 1)]
    fn load_all(bencher: Bencher) {
        let mut archive = Archive::open_bytes(get_input(), &OpenOptions::default()).unwrap();
        bencher.bench_local(move || {
            archive.load_all().unwrap();
            archive.unload_unmodified();
        });
    }
}

pub mod write {
    use divan::Bencher;
    use lumpkit_archive::format::chasm_bin::ChasmBin;
    use lumpkit_archive::{Archive, OpenOptions};

    #[divan::bench(sample_count = 10)]
    fn export(bencher: Bencher) {
        let options = OpenOptions::builder().load_data(true).build();
        let data = super::read::get_input();
        let mut archive = Archive::open_bytes(data, &options).unwrap();
        bencher.bench_local(move || {
            divan::black_box(archive.export(&ChasmBin).unwrap());
        });
    }
}
