mod multiset;
