use keyfan_core::config::{CipherSuite, CounterLocation, LabelTables, PrfAlgorithm};
use keyfan_core::{HierarchyShape, RootSecret};
use keyfan_crypto::{CounterModeKdf, FileCipher, KeyTree};

const SECRET: &[u8] = b"QRm9yuXDi2kfRJkxR6hyAUaNw7OV7OTu";

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench]
fn kdf_hmac_sha256() {
    derive_once(PrfAlgorithm::HmacSha256);
}

#[divan::bench]
fn kdf_cmac_aes256() {
    derive_once(PrfAlgorithm::CmacAes256);
}

fn derive_once(prf: PrfAlgorithm) {
    let kdf = CounterModeKdf::new(prf, CounterLocation::BeforeFixed);
    kdf.derive(
        divan::black_box(SECRET),
        divan::black_box(b"Label unit 0"),
        divan::black_box(b"Context unit 0"),
        32,
    )
    .unwrap();
}

#[divan::bench(args = [1, 2, 4, 8])]
fn tree_derive_all(bencher: divan::Bencher, workers: usize) {
    let shape = HierarchyShape::new(4, 4, 64).unwrap();
    let tables = LabelTables::placeholder(shape.departments, shape.units);
    let roots: Vec<RootSecret> = (0..shape.companies)
        .map(|i| RootSecret::from(format!("bench-company-{i}").as_str()))
        .collect();
    let tree = KeyTree::new(
        CounterModeKdf::new(PrfAlgorithm::HmacSha256, CounterLocation::BeforeFixed),
        workers,
    );
    bencher
        .counter(divan::counter::ItemsCount::new(shape.leaf_count()))
        .bench(|| {
            tree.derive_all(&roots, &tables.departments, &tables.units, shape)
                .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576, 4194304])]
fn encrypt_aes256_gcm(bencher: divan::Bencher, size: usize) {
    bench_encrypt(bencher, CipherSuite::Aes256Gcm, size);
}

#[divan::bench(args = [1024, 65536, 1048576, 4194304])]
fn encrypt_chacha20_poly1305(bencher: divan::Bencher, size: usize) {
    bench_encrypt(bencher, CipherSuite::ChaCha20Poly1305, size);
}

#[divan::bench(args = [1024, 65536, 1048576, 4194304])]
fn encrypt_aes256_ctr(bencher: divan::Bencher, size: usize) {
    bench_encrypt(bencher, CipherSuite::Aes256Ctr, size);
}

fn bench_encrypt(bencher: divan::Bencher, suite: CipherSuite, size: usize) {
    let key = [0xABu8; 32];
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            suite
                .encrypt(divan::black_box(&key), divan::black_box(&data))
                .unwrap()
        });
}

fn main() {
    divan::main();
}
