//! 定容开放寻址 64 位整数集合
//!
//! 0 作为空槽标记，是否插入过 0 单独记录。表长为 2 的幂且 >= 3 × 容量；
//! 冲突用双重哈希解决，步长取自 32 个奇数常量，与表长互素，
//! 探测序列可遍历所有槽位。

const STEPS: [usize; 32] = [
    1, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53,
    59, 61, 67, 71, 73, 79, 83, 89, 97, 101, 103, 107, 109, 113, 127, 131,
];

#[derive(Debug, Clone)]
pub struct Hash64 {
    table:        Vec<u64>,
    mask:         usize,
    zero_present: bool,
    len:          usize,
    capacity:     usize,
}

impl Hash64 {
    pub fn new(capacity: usize) -> Self {
        let size = (capacity.max(1) * 3).next_power_of_two().max(16);
        Self {
            table: vec![0u64; size],
            mask: size - 1,
            zero_present: false,
            len: 0,
            capacity,
        }
    }

    pub fn len(&self)      -> usize { self.len }
    pub fn is_empty(&self) -> bool  { self.len == 0 }
    pub fn capacity(&self) -> usize { self.capacity }

    /// 首个探测地址（murmur3 fmix64）
    fn find_address(&self, key: u64) -> usize {
        let mut h = key;
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        h ^= h >> 33;
        h as usize & self.mask
    }

    /// 探测步长（与 find_address 独立的混合函数）
    fn hash_step(&self, key: u64) -> usize {
        let mut h = key.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        h ^= h >> 29;
        h = h.wrapping_mul(0xbf58_476d_1ce4_e5b9);
        h ^= h >> 32;
        STEPS[(h & 31) as usize]
    }

    fn claim_slot(&mut self) {
        assert!(
            self.len < self.capacity,
            "Hash64 capacity {} exceeded", self.capacity,
        );
        self.len += 1;
    }

    /// 插入 `key`；返回是否为新键。超过声明容量会 panic。
    pub fn insert(&mut self, key: u64) -> bool {
        if key == 0 {
            if self.zero_present {
                return false;
            }
            self.claim_slot();
            self.zero_present = true;
            return true;
        }
        let step = self.hash_step(key);
        let mut addr = self.find_address(key);
        loop {
            match self.table[addr] {
                0 => {
                    self.claim_slot();
                    self.table[addr] = key;
                    return true;
                }
                k if k == key => return false,
                _ => addr = (addr + step) & self.mask,
            }
        }
    }

    pub fn find(&self, key: u64) -> bool {
        if key == 0 {
            return self.zero_present;
        }
        let step = self.hash_step(key);
        let mut addr = self.find_address(key);
        loop {
            match self.table[addr] {
                0 => return false,
                k if k == key => return true,
                _ => addr = (addr + step) & self.mask,
            }
        }
    }
}
